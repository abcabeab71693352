use crate::value::{ReturnValue, Value};

/// Observers run around every intercepted call while the shared trace lock is held.
///
/// `params` carry virtual ids. Hooks must not call back into the session.
pub trait CaptureHooks: Send + Sync {
    fn pre_call(&self, _call: &str, _params: &[Value]) {}

    fn post_call(&self, _call: &str, _params: &[Value], _result: &ReturnValue) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl CaptureHooks for NoHooks {}
