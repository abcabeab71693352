mod common;

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::CaptureRig;
use gfxvirt_runtime::{CaptureHooks, ReturnValue, StructValue, Value, NULL_HANDLE};
use gfxvirt_schema::GeneratorOptions;
use pretty_assertions::assert_eq;

#[test]
fn created_handles_are_virtualized_and_destroy_removes_them() {
    let rig = CaptureRig::new();
    let (instance, physical, device) = rig.bootstrap();
    assert!(instance < physical && physical < device);

    let buffer = rig.create_buffer(device);
    let object = rig.session.objects().get(buffer).unwrap();
    assert_eq!(object.handle_type, "VkBuffer");
    assert_eq!(object.parent, Some(device));
    assert_eq!(object.co_parent, None);
    let real = object.real;
    assert_ne!(real, buffer);

    // The application gets the id back; the trace holds the id too.
    let record = rig
        .trace
        .records()
        .into_iter()
        .rev()
        .find(|r| r.call == "vkCreateBuffer")
        .unwrap();
    assert_eq!(record.params[3], Value::Handle(buffer));
    assert!(record.tracked);

    let mut destroy = [Value::Handle(device), Value::Handle(buffer), Value::Null];
    rig.call("vkDestroyBuffer", &mut destroy);
    assert_eq!(rig.driver.last_call("vkDestroyBuffer").unwrap()[1], Value::Handle(real));
    assert_eq!(destroy[1], Value::Handle(buffer));
    assert!(rig.session.objects().get(buffer).is_none());
    assert_eq!(rig.session.objects().find_by_real("VkBuffer", real), None);
}

#[test]
fn failed_create_leaves_the_table_alone_and_omits_the_output() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let before = rig.session.objects().len();

    rig.driver.set_failing(true);
    let mut params = [Value::Handle(device), Value::Null, Value::Null, Value::Handle(0)];
    assert_eq!(rig.call("vkCreateBuffer", &mut params), ReturnValue::Result(-1));

    assert_eq!(rig.session.objects().len(), before);
    let record = rig.trace.records().pop().unwrap();
    assert_eq!(record.call, "vkCreateBuffer");
    assert_eq!(record.result, ReturnValue::Result(-1));
    assert!(record.output_omitted);
    assert_eq!(record.params[3], Value::Null);
}

#[test]
fn batch_create_assigns_distinct_ordered_ids_under_one_parent() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let before = rig.session.objects().len();

    let info = StructValue::new("VkComputePipelineCreateInfo").with("layout", Value::Handle(0));
    let mut params = [
        Value::Handle(device),
        Value::Handle(NULL_HANDLE),
        Value::Scalar(3),
        Value::Structs(vec![info.clone(), info.clone(), info]),
        Value::Null,
        Value::Handles(vec![0; 3]),
    ];
    assert_eq!(rig.call("vkCreateComputePipelines", &mut params), ReturnValue::SUCCESS);

    let Value::Handles(ids) = &params[5] else {
        panic!("{:?}", params[5]);
    };
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "{ids:?}");
    assert_eq!(rig.session.objects().len(), before + 3);
    for id in ids {
        let object = rig.session.objects().get(*id).unwrap();
        assert_eq!(object.parent, Some(device));
        assert_eq!(object.co_parent, None);
    }
}

#[test]
fn output_arrays_are_wrapped_up_to_the_declared_count() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let pool = rig.create_command_pool(device);

    // Two requested, room for three.
    let mut params = [
        Value::Handle(device),
        Value::Struct(
            StructValue::new("VkCommandBufferAllocateInfo")
                .with("commandPool", Value::Handle(pool))
                .with("commandBufferCount", Value::Scalar(2)),
        ),
        Value::Handles(vec![0; 3]),
    ];
    let before = rig.session.objects().len();
    rig.call("vkAllocateCommandBuffers", &mut params);
    let Value::Handles(ids) = &params[2] else {
        panic!("{:?}", params[2]);
    };
    // The caller's storage keeps its length; only the requested slots are wrapped.
    assert_eq!(ids.len(), 3);
    assert_eq!(rig.session.objects().len(), before + 2);
    for id in &ids[..2] {
        assert_eq!(rig.session.objects().get(*id).unwrap().co_parent, Some(pool));
    }

    let record = rig.trace.records().pop().unwrap();
    assert_eq!(record.call, "vkAllocateCommandBuffers");
    assert_eq!(record.params[2], Value::Handles(ids[..2].to_vec()));
}

#[test]
fn pool_free_removes_exactly_the_freed_handles() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let pool = rig.create_command_pool(device);
    let freed = rig.allocate_command_buffers(device, pool, 4);
    let kept = rig.allocate_command_buffers(device, pool, 1);
    let before = rig.session.objects().len();

    let mut params = [
        Value::Handle(device),
        Value::Handle(pool),
        Value::Scalar(4),
        Value::Handles(freed.clone()),
    ];
    rig.call("vkFreeCommandBuffers", &mut params);

    assert_eq!(rig.session.objects().len(), before - 4);
    assert!(freed.iter().all(|id| rig.session.objects().get(*id).is_none()));
    assert!(rig.session.objects().get(kept[0]).is_some());
    assert!(rig.session.objects().get(pool).is_some());
}

#[test]
fn destroying_a_pool_drops_its_allocations() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let pool = rig.create_command_pool(device);
    let buffers = rig.allocate_command_buffers(device, pool, 2);
    let before = rig.session.objects().len();

    let mut params = [Value::Handle(device), Value::Handle(pool), Value::Null];
    rig.call("vkDestroyCommandPool", &mut params);

    assert_eq!(rig.session.objects().len(), before - 3);
    assert!(buffers.iter().all(|id| rig.session.objects().get(*id).is_none()));
    assert!(rig.session.objects().get(device).is_some());
}

#[test]
fn destroying_the_device_drops_everything_beneath_it() {
    let rig = CaptureRig::new();
    let (instance, physical, device) = rig.bootstrap();
    let buffer = rig.create_buffer(device);
    let pool = rig.create_command_pool(device);
    rig.allocate_command_buffers(device, pool, 2);

    let mut params = [Value::Handle(device), Value::Null];
    rig.call("vkDestroyDevice", &mut params);

    assert!(rig.session.objects().get(buffer).is_none());
    assert!(rig.session.objects().get(device).is_none());
    assert!(rig.session.objects().get(instance).is_some());
    assert!(rig.session.objects().get(physical).is_some());
}

#[test]
fn retrieved_handles_keep_their_id() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let before = rig.session.objects().len();

    let get_queue = || {
        let mut params = [
            Value::Handle(device),
            Value::Scalar(0),
            Value::Scalar(0),
            Value::Handle(0),
        ];
        rig.call("vkGetDeviceQueue", &mut params);
        params[3].as_handle().unwrap()
    };
    let first = get_queue();
    assert_eq!(get_queue(), first);
    assert_eq!(rig.session.objects().len(), before + 1);
    assert_eq!(rig.session.objects().get(first).unwrap().parent, Some(device));
}

#[test]
fn unknown_ids_reach_the_driver_as_null() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();

    let mut params = [Value::Handle(device), Value::Handle(0xdead_beef), Value::Null];
    rig.call("vkDestroyBuffer", &mut params);
    assert_eq!(rig.driver.last_call("vkDestroyBuffer").unwrap()[1], Value::Handle(NULL_HANDLE));
}

#[test]
fn type_erased_handles_are_unwrapped_through_their_object_type() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let buffer = rig.create_buffer(device);
    let real = rig.session.real_handle(buffer).unwrap();

    let mut params = [
        Value::Handle(device),
        Value::Struct(
            StructValue::new("VkDebugUtilsObjectNameInfoEXT")
                .with("objectType", Value::Scalar(9))
                .with("objectHandle", Value::Scalar(buffer)),
        ),
    ];
    rig.call("vkSetDebugUtilsObjectNameEXT", &mut params);

    let seen = rig.driver.last_call("vkSetDebugUtilsObjectNameEXT").unwrap();
    assert_eq!(seen[1].as_struct().unwrap().get("objectHandle"), Some(&Value::Scalar(real)));
    // The trace keeps the id.
    let record = rig.trace.records().pop().unwrap();
    assert_eq!(
        record.params[1].as_struct().unwrap().get("objectHandle"),
        Some(&Value::Scalar(buffer))
    );
}

#[test]
fn extension_chain_handles_are_unwrapped() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let buffer = rig.create_buffer(device);
    let real = rig.session.real_handle(buffer).unwrap();

    let dedicated = StructValue::new("VkMemoryDedicatedAllocateInfo")
        .with("image", Value::Handle(0))
        .with("buffer", Value::Handle(buffer));
    let mut params = [
        Value::Handle(device),
        Value::Struct(StructValue::new("VkMemoryAllocateInfo").with(
            "pNext",
            Value::Chain(vec![
                gfxvirt_runtime::ChainLink::Unknown {
                    type_tag: 77,
                    bytes: vec![1, 2, 3],
                },
                gfxvirt_runtime::ChainLink::Known {
                    type_tag: 1000127001,
                    value: dedicated,
                },
            ]),
        )),
        Value::Null,
        Value::Handle(0),
    ];
    assert_eq!(rig.call("vkAllocateMemory", &mut params), ReturnValue::SUCCESS);

    let seen = rig.driver.last_call("vkAllocateMemory").unwrap();
    let Some(Value::Chain(links)) = seen[1].as_struct().unwrap().get("pNext") else {
        panic!("{:?}", seen[1]);
    };
    assert_eq!(links.len(), 2);
    let gfxvirt_runtime::ChainLink::Known { value, .. } = &links[1] else {
        panic!("{:?}", links[1]);
    };
    assert_eq!(value.get("buffer"), Some(&Value::Handle(real)));
}

#[test]
fn recording_calls_track_command_buffer_references() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    let pool = rig.create_command_pool(device);
    let cb = rig.allocate_command_buffers(device, pool, 1)[0];

    let mut params = [
        Value::Handle(cb),
        Value::Scalar(0),
        Value::Handle(41),
        Value::Scalar(0),
        Value::Scalar(2),
        Value::Handles(vec![42, 43]),
    ];
    rig.call("vkCmdBindDescriptorSets", &mut params);
    rig.call("vkCmdBindDescriptorSets", &mut params);
    assert_eq!(rig.session.references().references(cb), vec![41, 42, 43]);

    let mut free = [
        Value::Handle(device),
        Value::Handle(pool),
        Value::Scalar(1),
        Value::Handles(vec![cb]),
    ];
    rig.call("vkFreeCommandBuffers", &mut free);
    assert!(rig.session.references().references(cb).is_empty());
}

#[test]
fn overrides_replace_the_driver_call() {
    let mut options = GeneratorOptions::default();
    options
        .add_capture_overrides_json(r#"{"functions": {"vkCreateFence": "OverrideCreateFence"}}"#)
        .unwrap();
    let mut rig = CaptureRig::with_registry(common::registry_with(options));
    let (_, _, device) = rig.bootstrap();
    rig.session.register_override(
        "OverrideCreateFence",
        Arc::new(|params: &mut [Value]| {
            params[3] = Value::Handle(0xfe);
            ReturnValue::SUCCESS
        }),
    );
    let before = rig.session.objects().len();

    let mut params = [Value::Handle(device), Value::Null, Value::Null, Value::Handle(0)];
    assert_eq!(rig.call("vkCreateFence", &mut params), ReturnValue::SUCCESS);

    assert_eq!(params[3], Value::Handle(0xfe));
    assert!(rig.driver.last_call("vkCreateFence").is_none());
    assert_eq!(rig.session.objects().len(), before);
    let record = rig.trace.records().pop().unwrap();
    assert_eq!(record.call, "vkCreateFence");
    assert_eq!(record.params[3], Value::Handle(0xfe));
}

#[test]
fn unknown_commands_are_no_ops() {
    let rig = CaptureRig::new();
    let mut params = [Value::Scalar(1)];
    assert_eq!(rig.call("vkNotARealCommand", &mut params), ReturnValue::Void);
    assert!(rig.trace.is_empty());
    assert_eq!(rig.session.call_count(), 0);
}

#[test]
fn finalized_sessions_keep_virtualizing_without_writing() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();
    rig.session.finalize();
    assert!(rig.session.is_finalized());
    let written = rig.trace.len();

    let buffer = rig.create_buffer(device);
    assert!(rig.session.objects().get(buffer).is_some());
    assert_eq!(rig.trace.len(), written);
}

#[derive(Default)]
struct RecordingHooks {
    seen: Mutex<Vec<String>>,
}

impl CaptureHooks for RecordingHooks {
    fn pre_call(&self, call: &str, _params: &[Value]) {
        self.seen.lock().unwrap().push(format!("pre {call}"));
    }

    fn post_call(&self, call: &str, params: &[Value], result: &ReturnValue) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("post {call} {:?} {result:?}", params.last()));
    }
}

#[test]
fn hooks_run_around_the_call_with_virtual_ids() {
    let mut rig = CaptureRig::new();
    let hooks = Arc::new(RecordingHooks::default());
    rig.session.set_hooks(hooks.clone());

    let mut params = [Value::Null, Value::Null, Value::Handle(0)];
    rig.call("vkCreateInstance", &mut params);
    let id = params[2].as_handle().unwrap();

    assert_eq!(
        *hooks.seen.lock().unwrap(),
        vec![
            "pre vkCreateInstance".to_owned(),
            format!("post vkCreateInstance Some(Handle({id})) Result(0)"),
        ]
    );
}

#[test]
fn concurrent_creates_get_unique_ids() {
    let rig = CaptureRig::new();
    let (_, _, device) = rig.bootstrap();

    let rig = &rig;
    let ids: Vec<u64> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(move || (0..8).map(|_| rig.create_buffer(device)).collect::<Vec<_>>())
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 32);
    assert_eq!(
        rig.trace.records().iter().filter(|r| r.call == "vkCreateBuffer").count(),
        32
    );
}

/// Parks every `vkCreateBuffer` inside its pre-call hook until the test releases it.
struct GateHooks {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    events: Mutex<Vec<&'static str>>,
}

impl CaptureHooks for GateHooks {
    fn pre_call(&self, call: &str, _params: &[Value]) {
        if call == "vkCreateBuffer" {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
    }

    fn post_call(&self, call: &str, _params: &[Value], _result: &ReturnValue) {
        if call == "vkCreateBuffer" {
            self.events.lock().unwrap().push("call done");
        }
    }
}

#[test]
fn finalize_waits_for_in_flight_calls() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let hooks = Arc::new(GateHooks {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        events: Mutex::new(Vec::new()),
    });
    let mut rig = CaptureRig::new();
    rig.session.set_hooks(hooks.clone());
    let (_, _, device) = rig.bootstrap();

    let rig = &rig;
    thread::scope(|scope| {
        let call = scope.spawn(move || rig.create_buffer(device));
        entered_rx.recv().unwrap();

        let finalize = scope.spawn(|| {
            rig.session.finalize();
            hooks.events.lock().unwrap().push("finalized");
        });
        thread::sleep(Duration::from_millis(50));
        let finalized_early = !hooks.events.lock().unwrap().is_empty();

        release_tx.send(()).unwrap();
        call.join().unwrap();
        finalize.join().unwrap();
        assert!(!finalized_early);
    });

    assert_eq!(*hooks.events.lock().unwrap(), vec!["call done", "finalized"]);
    assert!(rig.session.is_finalized());
    assert_eq!(rig.trace.records().last().unwrap().call, "vkCreateBuffer");
}
