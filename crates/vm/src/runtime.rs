//! Deterministic wasmtime embedding.
//!
//! The engine is configured for reproducible execution: fuel metering stands
//! in for compute ticks, NaN canonicalization pins floating point results,
//! and threads are disabled. Each contract call is a single-shot
//! instantiation of a cached module against a fresh store; nothing survives a
//! call except what the host wrote to state.

use crate::cache::ModuleCache;
use crate::{Result, VmError};
use anyhow::Context as _;
use tracing::trace;
use wasmtime::{Caller, Config, Engine, Linker, Module, Store, Trap};

/// Import namespace the sandbox links against.
pub const HOST_MODULE: &str = "env";

/// The contract entry export.
pub const ENTRY_EXPORT: &str = "_start";

/// The linear memory export host calls read and write through.
pub const MEMORY_EXPORT: &str = "memory";

/// The embedding contract between the sandbox and the execution layer.
///
/// Implementations are supplied per call; the sandbox re-enters the execution
/// core exclusively through these methods.
pub trait HostInterface: Send {
    /// Invokes a native thunk directly. Privilege rules are the host's.
    fn invoke_thunk(&self, tid: u32, args: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Invokes a system call, resolving any installed override.
    fn invoke_system_call(&self, sid: u32, args: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Remaining compute ticks, clamped to `i64::MAX`.
    fn get_meter_ticks(&self) -> i64;

    /// Consumes compute ticks, saturating at zero.
    fn use_meter_ticks(&self, ticks: u64);
}

struct HostState {
    host: Box<dyn HostInterface>,
}

/// VM tuning configuration.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Number of compiled modules retained in the cache
    pub module_cache_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            module_cache_size: 32,
        }
    }
}

/// The process-wide sandbox backend: engine, linker, and module cache.
pub struct VmBackend {
    engine: Engine,
    linker: Linker<HostState>,
    cache: ModuleCache,
}

impl VmBackend {
    /// Builds a deterministic engine and its host linker.
    pub fn new(config: VmConfig) -> Result<Self> {
        let mut engine_config = Config::new();
        engine_config
            .consume_fuel(true)
            .cranelift_nan_canonicalization(true)
            .wasm_threads(false);

        let engine = Engine::new(&engine_config)
            .map_err(|e| VmError::InvalidModule(format!("engine configuration: {e}")))?;

        let mut linker: Linker<HostState> = Linker::new(&engine);
        linker
            .func_wrap(
                HOST_MODULE,
                "invoke_thunk",
                |caller: Caller<'_, HostState>,
                 tid: u32,
                 ret_ptr: u32,
                 ret_len: u32,
                 arg_ptr: u32,
                 arg_len: u32| {
                    host_call(caller, ret_ptr, ret_len, arg_ptr, arg_len, |host, args| {
                        host.invoke_thunk(tid, args)
                    })
                },
            )
            .and_then(|linker| {
                linker.func_wrap(
                    HOST_MODULE,
                    "invoke_system_call",
                    |caller: Caller<'_, HostState>,
                     sid: u32,
                     ret_ptr: u32,
                     ret_len: u32,
                     arg_ptr: u32,
                     arg_len: u32| {
                        host_call(caller, ret_ptr, ret_len, arg_ptr, arg_len, |host, args| {
                            host.invoke_system_call(sid, args)
                        })
                    },
                )
            })
            .map_err(|e| VmError::InvalidModule(format!("host linking: {e}")))?;

        Ok(Self {
            engine,
            linker,
            cache: ModuleCache::new(config.module_cache_size),
        })
    }

    /// Compiles raw bytecode into a module.
    pub fn compile(&self, bytecode: &[u8]) -> Result<Module> {
        Module::new(&self.engine, bytecode).map_err(|e| VmError::InvalidModule(e.to_string()))
    }

    /// Fetches the module for `key` from the cache, compiling and inserting
    /// `bytecode` on a miss.
    pub fn load_module(&self, key: &[u8], bytecode: &[u8]) -> Result<Module> {
        if let Some(module) = self.cache.get(key) {
            trace!("module cache hit");
            return Ok(module);
        }
        let module = self.compile(bytecode)?;
        self.cache.put(key, module.clone());
        Ok(module)
    }

    /// The shared module cache.
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Runs a module's `_start` export against `host`.
    ///
    /// The store's fuel is seeded from the host's remaining ticks and
    /// reconciled back through [`HostInterface::use_meter_ticks`] on every
    /// exit path. Host errors propagate unchanged; running out of fuel
    /// surfaces as [`VmError::TicksExhausted`].
    pub fn run(&self, host: Box<dyn HostInterface>, module: &Module) -> anyhow::Result<()> {
        let initial_ticks = host.get_meter_ticks().max(0) as u64;
        let mut store = Store::new(&self.engine, HostState { host });
        store.set_fuel(initial_ticks).context("seeding fuel")?;

        let instance = self
            .linker
            .instantiate(&mut store, module)
            .map_err(|e| anyhow::Error::new(VmError::Instantiation(e.to_string())))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_EXPORT)
            .map_err(|_| anyhow::Error::new(VmError::MissingExport(ENTRY_EXPORT)))?;

        let outcome = start.call(&mut store, ());

        let remaining = store.get_fuel().unwrap_or(0);
        store
            .data()
            .host
            .use_meter_ticks(initial_ticks.saturating_sub(remaining));

        outcome.map_err(|err| {
            if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
                anyhow::Error::new(VmError::TicksExhausted)
            } else {
                err
            }
        })
    }
}

fn checked_range(data_len: usize, ptr: u32, len: u32) -> anyhow::Result<std::ops::Range<usize>> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= data_len)
        .ok_or_else(|| anyhow::Error::new(VmError::MemoryAccessViolation))?;
    Ok(start..end)
}

fn host_call<F>(
    mut caller: Caller<'_, HostState>,
    ret_ptr: u32,
    ret_len: u32,
    arg_ptr: u32,
    arg_len: u32,
    invoke: F,
) -> anyhow::Result<u32>
where
    F: FnOnce(&dyn HostInterface, &[u8]) -> anyhow::Result<Vec<u8>>,
{
    let memory = caller
        .get_export(MEMORY_EXPORT)
        .and_then(|export| export.into_memory())
        .ok_or_else(|| anyhow::Error::new(VmError::MissingExport(MEMORY_EXPORT)))?;

    // Validate both buffers before touching the host.
    let data = memory.data(&caller);
    let arg_range = checked_range(data.len(), arg_ptr, arg_len)?;
    checked_range(data.len(), ret_ptr, ret_len)?;
    let args = data[arg_range].to_vec();

    let ret = invoke(caller.data().host.as_ref(), &args)?;

    if ret.len() > ret_len as usize {
        return Err(anyhow::Error::new(VmError::InsufficientReturnBuffer {
            needed: ret.len(),
            available: ret_len as usize,
        }));
    }
    memory
        .write(&mut caller, ret_ptr as usize, &ret)
        .map_err(|_| anyhow::Error::new(VmError::MemoryAccessViolation))?;
    Ok(ret.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Host that records calls and echoes fixed bytes.
    struct EchoHost {
        response: Vec<u8>,
        calls: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
        ticks: Arc<Mutex<i64>>,
    }

    impl HostInterface for EchoHost {
        fn invoke_thunk(&self, tid: u32, args: &[u8]) -> anyhow::Result<Vec<u8>> {
            self.calls.lock().push((tid, args.to_vec()));
            Ok(self.response.clone())
        }

        fn invoke_system_call(&self, sid: u32, args: &[u8]) -> anyhow::Result<Vec<u8>> {
            self.invoke_thunk(sid, args)
        }

        fn get_meter_ticks(&self) -> i64 {
            *self.ticks.lock()
        }

        fn use_meter_ticks(&self, ticks: u64) {
            let mut remaining = self.ticks.lock();
            *remaining = remaining.saturating_sub(ticks as i64);
        }
    }

    /// A module that calls `invoke_system_call(7)` with 3 arg bytes and a
    /// 16-byte return area, then returns.
    const CALLER_WAT: &str = r#"
        (module
          (import "env" "invoke_system_call"
            (func $syscall (param i32 i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 64) "abc")
          (func (export "_start")
            (drop (call $syscall (i32.const 7) (i32.const 0) (i32.const 16)
                                 (i32.const 64) (i32.const 3)))))
    "#;

    fn backend() -> VmBackend {
        VmBackend::new(VmConfig::default()).unwrap()
    }

    #[test]
    fn test_host_call_round_trip() {
        let vm = backend();
        let module = vm.compile(CALLER_WAT.as_bytes()).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let host = EchoHost {
            response: b"ok".to_vec(),
            calls: calls.clone(),
            ticks: Arc::new(Mutex::new(1_000_000)),
        };
        vm.run(Box::new(host), &module).unwrap();
        assert_eq!(calls.lock().as_slice(), &[(7, b"abc".to_vec())]);
    }

    #[test]
    fn test_fuel_is_consumed() {
        let vm = backend();
        let module = vm.compile(CALLER_WAT.as_bytes()).unwrap();
        let ticks = Arc::new(Mutex::new(1_000_000i64));
        let host = EchoHost {
            response: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            ticks: ticks.clone(),
        };
        vm.run(Box::new(host), &module).unwrap();
        assert!(*ticks.lock() < 1_000_000);
    }

    #[test]
    fn test_out_of_fuel_is_ticks_exhausted() {
        let vm = backend();
        let module = vm.compile(CALLER_WAT.as_bytes()).unwrap();
        let host = EchoHost {
            response: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            ticks: Arc::new(Mutex::new(1)),
        };
        let err = vm.run(Box::new(host), &module).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VmError>(),
            Some(VmError::TicksExhausted)
        ));
    }

    #[test]
    fn test_oversized_return_is_rejected() {
        let vm = backend();
        let module = vm.compile(CALLER_WAT.as_bytes()).unwrap();
        let host = EchoHost {
            // 17 bytes into a 16-byte return area.
            response: vec![0u8; 17],
            calls: Arc::new(Mutex::new(Vec::new())),
            ticks: Arc::new(Mutex::new(1_000_000)),
        };
        let err = vm.run(Box::new(host), &module).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VmError>(),
            Some(VmError::InsufficientReturnBuffer { needed: 17, available: 16 })
        ));
    }

    #[test]
    fn test_missing_start_export() {
        let vm = backend();
        let module = vm.compile(b"(module)").unwrap();
        let host = EchoHost {
            response: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            ticks: Arc::new(Mutex::new(1_000)),
        };
        let err = vm.run(Box::new(host), &module).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VmError>(),
            Some(VmError::MissingExport(ENTRY_EXPORT))
        ));
    }

    #[test]
    fn test_out_of_bounds_args_rejected() {
        // arg_ptr far outside the single memory page.
        let wat = r#"
            (module
              (import "env" "invoke_thunk"
                (func $thunk (param i32 i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "_start")
                (drop (call $thunk (i32.const 1) (i32.const 0) (i32.const 0)
                                   (i32.const 1000000) (i32.const 8)))))
        "#;
        let vm = backend();
        let module = vm.compile(wat.as_bytes()).unwrap();
        let host = EchoHost {
            response: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            ticks: Arc::new(Mutex::new(1_000_000)),
        };
        let err = vm.run(Box::new(host), &module).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VmError>(),
            Some(VmError::MemoryAccessViolation)
        ));
    }
}
