use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bitflags::bitflags;

use crate::diagnostics::RuntimeError;
use crate::runtime::value::{Object, Value};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const RETURN = 1 << 0;
        const SUB_FRAME = 1 << 1;
        const LOOP_BREAK = 1 << 2;
        const LOOP_CONTINUE = 1 << 3;
        const IN_TRY = 1 << 4;
        const IN_OBJECT = 1 << 5;
    }
}

/// Activation record for the program root or a callable invocation.
#[derive(Debug, Default)]
pub struct CallFrame {
    pub variables: HashMap<String, Value>,
    pub return_value: Value,
    pub error_state: Option<RuntimeError>,
    pub object_context: Option<Rc<RefCell<Object>>>,
    pub flags: FrameFlags,
}

impl Default for FrameFlags {
    fn default() -> Self {
        FrameFlags::empty()
    }
}

impl CallFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn set_flag(&mut self, flag: FrameFlags) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: FrameFlags) {
        self.flags &= !flag;
    }

    pub fn is_flag_set(&self, flag: FrameFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_object_context(&mut self, object: Rc<RefCell<Object>>) {
        self.object_context = Some(object);
        self.set_flag(FrameFlags::IN_OBJECT);
    }

    pub fn in_object_context(&self) -> bool {
        self.is_flag_set(FrameFlags::IN_OBJECT) && self.object_context.is_some()
    }

    pub fn object_context(&self) -> Option<Rc<RefCell<Object>>> {
        self.object_context.clone()
    }

    pub fn set_error_state(&mut self, error: RuntimeError) {
        self.error_state = Some(error);
    }

    pub fn clear_error_state(&mut self) {
        self.error_state = None;
    }
}
