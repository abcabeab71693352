#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gfxvirt_runtime::{
    CaptureSession, EntryPoint, MemoryTrace, ProcAddrResolver, ReplayConsumer, ReturnValue,
    StructValue, Value,
};
use gfxvirt_schema::{ApiRegistry, DispatchScope, GeneratorOptions};

pub const MINI_VK: &str = include_str!("../../../gfxvirt-schema/tests/fixtures/mini_vk.json");

/// Physical devices (and image-group entries) the fake driver reports on enumeration.
pub const ENUMERATED: u64 = 2;

pub fn registry() -> Arc<ApiRegistry> {
    registry_with(GeneratorOptions::default())
}

pub fn registry_with(options: GeneratorOptions) -> Arc<ApiRegistry> {
    Arc::new(ApiRegistry::from_json_str(MINI_VK, options).expect("fixture schema builds"))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct DriverState {
    registry: Arc<ApiRegistry>,
    next: AtomicU64,
    failing: AtomicBool,
    retrieved: Mutex<HashMap<String, u64>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

/// A driver stand-in that hands out increasing real handles.
///
/// Create and allocate calls fill every handle slot of their output parameters; `vkGet*` and
/// `vkEnumerate*` calls return the same handle for the same inputs. An output array passed as
/// `Null` turns the call into a count query.
#[derive(Clone)]
pub struct FakeDriver {
    state: Arc<DriverState>,
}

impl FakeDriver {
    pub fn new(registry: Arc<ApiRegistry>, first_handle: u64) -> Self {
        Self {
            state: Arc::new(DriverState {
                registry,
                next: AtomicU64::new(first_handle),
                failing: AtomicBool::new(false),
                retrieved: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Makes every create/allocate call fail with a negative result.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self, name: &str) -> Option<Vec<Value>> {
        self.calls()
            .into_iter()
            .rev()
            .find(|(call, _)| call == name)
            .map(|(_, params)| params)
    }

    pub fn entry(&self, name: &str) -> EntryPoint {
        let driver = self.clone();
        let name = name.to_owned();
        Arc::new(move |params: &mut [Value]| driver.call(&name, params))
    }

    fn call(&self, name: &str, params: &mut [Value]) -> ReturnValue {
        let registry = Arc::clone(&self.state.registry);
        let plan = registry.command(name).expect("fixture command");
        let outputs: Vec<usize> = plan
            .command
            .params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_output())
            .map(|(i, _)| i)
            .collect();

        let creates = name.starts_with("vkCreate") || name.starts_with("vkAllocate");
        let retrieves = name.starts_with("vkGet") || name.starts_with("vkEnumerate");
        let result = if creates && self.state.failing.load(Ordering::SeqCst) {
            ReturnValue::Result(-1)
        } else if creates || retrieves {
            let count_query = outputs.iter().any(|&i| params[i] == Value::Null);
            let inputs = format!(
                "{:?}",
                params
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !outputs.contains(i))
                    .map(|(_, v)| v)
                    .collect::<Vec<_>>()
            );
            let mut slot = 0;
            for &i in &outputs {
                match &mut params[i] {
                    Value::Scalar(count) if count_query => *count = ENUMERATED,
                    value => self.fill(name, &inputs, retrieves, &mut slot, value),
                }
            }
            ReturnValue::neutral(plan.return_kind)
        } else {
            ReturnValue::neutral(plan.return_kind)
        };

        self.state
            .calls
            .lock()
            .unwrap()
            .push((name.to_owned(), params.to_vec()));
        result
    }

    fn fill(&self, name: &str, inputs: &str, retrieves: bool, slot: &mut usize, value: &mut Value) {
        let issue = |slot: &mut usize| {
            *slot += 1;
            if retrieves {
                let key = format!("{name}/{slot}/{inputs}");
                *self
                    .state
                    .retrieved
                    .lock()
                    .unwrap()
                    .entry(key)
                    .or_insert_with(|| self.state.next.fetch_add(1, Ordering::SeqCst))
            } else {
                self.state.next.fetch_add(1, Ordering::SeqCst)
            }
        };
        match value {
            Value::Handle(h) => *h = issue(slot),
            Value::Handles(hs) => hs.iter_mut().for_each(|h| *h = issue(slot)),
            Value::Struct(s) => s
                .members
                .values_mut()
                .for_each(|v| self.fill(name, inputs, retrieves, slot, v)),
            Value::Structs(ss) => ss
                .iter_mut()
                .flat_map(|s| s.members.values_mut())
                .for_each(|v| self.fill(name, inputs, retrieves, slot, v)),
            _ => {}
        }
    }
}

impl ProcAddrResolver for FakeDriver {
    fn resolve(&self, _handle: u64, name: &str) -> Option<EntryPoint> {
        self.state
            .registry
            .command(name)
            .map(|plan| self.entry(plan.name()))
    }
}

/// A capture session wired to a [`FakeDriver`] with both dispatch tables loaded.
pub struct CaptureRig {
    pub registry: Arc<ApiRegistry>,
    pub driver: FakeDriver,
    pub trace: Arc<MemoryTrace>,
    pub session: CaptureSession,
}

impl CaptureRig {
    pub fn new() -> Self {
        Self::with_registry(registry())
    }

    pub fn with_registry(registry: Arc<ApiRegistry>) -> Self {
        init_tracing();
        let driver = FakeDriver::new(Arc::clone(&registry), 0x1000);
        let trace = Arc::new(MemoryTrace::new());
        let session = CaptureSession::new(Arc::clone(&registry), trace.clone());
        for name in ["vkCreateInstance", "vkCreateDevice"] {
            assert!(session.set_layer_entry(name, driver.entry(name)));
        }
        Self {
            registry,
            driver,
            trace,
            session,
        }
    }

    pub fn load_tables(&self) {
        self.session.load_instance_table(&self.driver, 0);
        self.session.load_device_table(&self.driver, 0);
    }

    pub fn call(&self, name: &str, params: &mut [Value]) -> ReturnValue {
        self.session.invoke(name, params)
    }

    /// Instance, first physical device and device ids.
    pub fn bootstrap(&self) -> (u64, u64, u64) {
        let mut create_instance = [Value::Null, Value::Null, Value::Handle(0)];
        assert_eq!(self.call("vkCreateInstance", &mut create_instance), ReturnValue::SUCCESS);
        let instance = create_instance[2].as_handle().unwrap();
        self.load_tables();

        let mut enumerate = [Value::Handle(instance), Value::Scalar(0), Value::Null];
        self.call("vkEnumeratePhysicalDevices", &mut enumerate);
        let count = enumerate[1].as_scalar().unwrap() as usize;
        let mut enumerate = [
            Value::Handle(instance),
            Value::Scalar(count as u64),
            Value::Handles(vec![0; count]),
        ];
        self.call("vkEnumeratePhysicalDevices", &mut enumerate);
        let Value::Handles(physical) = &enumerate[2] else {
            panic!("{:?}", enumerate[2]);
        };
        let physical = physical[0];

        let mut create_device = [
            Value::Handle(physical),
            Value::Null,
            Value::Null,
            Value::Handle(0),
        ];
        assert_eq!(self.call("vkCreateDevice", &mut create_device), ReturnValue::SUCCESS);
        (instance, physical, create_device[3].as_handle().unwrap())
    }

    pub fn create_buffer(&self, device: u64) -> u64 {
        let mut params = [Value::Handle(device), Value::Null, Value::Null, Value::Handle(0)];
        assert_eq!(self.call("vkCreateBuffer", &mut params), ReturnValue::SUCCESS);
        params[3].as_handle().unwrap()
    }

    pub fn create_command_pool(&self, device: u64) -> u64 {
        let mut params = [Value::Handle(device), Value::Null, Value::Null, Value::Handle(0)];
        assert_eq!(self.call("vkCreateCommandPool", &mut params), ReturnValue::SUCCESS);
        params[3].as_handle().unwrap()
    }

    pub fn allocate_command_buffers(&self, device: u64, pool: u64, count: usize) -> Vec<u64> {
        let mut params = [
            Value::Handle(device),
            Value::Struct(
                StructValue::new("VkCommandBufferAllocateInfo")
                    .with("commandPool", Value::Handle(pool))
                    .with("commandBufferCount", Value::Scalar(count as u64)),
            ),
            Value::Handles(vec![0; count]),
        ];
        assert_eq!(self.call("vkAllocateCommandBuffers", &mut params), ReturnValue::SUCCESS);
        match &params[2] {
            Value::Handles(ids) => ids.clone(),
            other => panic!("{other:?}"),
        }
    }
}

/// Replay-side counterpart of [`CaptureRig`], using a driver with a disjoint handle range.
pub fn replay_driver(registry: &Arc<ApiRegistry>) -> FakeDriver {
    FakeDriver::new(Arc::clone(registry), 0x9000_0000)
}

pub fn install(consumer: &mut ReplayConsumer, driver: &FakeDriver) {
    for name in ["vkCreateInstance", "vkCreateDevice"] {
        assert!(consumer.set_entry(DispatchScope::Layer, name, driver.entry(name)));
    }
    consumer.load_instance_table(driver, 0);
    consumer.load_device_table(driver, 0);
}
