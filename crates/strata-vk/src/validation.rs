// SPDX-License-Identifier: CEPL-1.0
//! Validation-layer plumbing.
//!
//! The debug messenger forwards every message to a [`ValidationSink`] that
//! the context owns; nothing here touches process-wide logger state.

use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::prelude::VkResult;
use ash::vk;

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl Severity {
    fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        if flags.contains(S::ERROR) {
            Severity::Error
        } else if flags.contains(S::WARNING) {
            Severity::Warning
        } else if flags.contains(S::INFO) {
            Severity::Info
        } else {
            Severity::Verbose
        }
    }
}

fn kind_name(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    use vk::DebugUtilsMessageTypeFlagsEXT as T;
    if types.contains(T::VALIDATION) {
        "validation"
    } else if types.contains(T::PERFORMANCE) {
        "performance"
    } else if types.contains(T::GENERAL) {
        "general"
    } else {
        "other"
    }
}

/// Receives validation-layer messages.
pub trait ValidationSink: Send + Sync {
    fn message(&self, severity: Severity, kind: &str, text: &str);
}

/// Forwards to `tracing` under the `validation` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ValidationSink for TracingSink {
    fn message(&self, severity: Severity, kind: &str, text: &str) {
        match severity {
            Severity::Verbose => tracing::debug!(target: "validation", "[{kind}] {text}"),
            Severity::Info => tracing::info!(target: "validation", "[{kind}] {text}"),
            Severity::Warning => tracing::warn!(target: "validation", "[{kind}] {text}"),
            Severity::Error => tracing::error!(target: "validation", "[{kind}] {text}"),
        }
    }
}

pub(crate) fn layer_available(entry: &ash::Entry) -> bool {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };
    layers.iter().any(|l| {
        l.layer_name_as_c_str()
            .map(|name| name == VALIDATION_LAYER)
            .unwrap_or(false)
    })
}

/// Debug messenger plus the sink its callback points at.
pub(crate) struct Messenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
    // Double box: the callback gets a thin pointer to the fat one.
    sink: Box<Box<dyn ValidationSink>>,
}

impl Messenger {
    pub(crate) fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        sink: Box<dyn ValidationSink>,
    ) -> VkResult<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let sink = Box::new(sink);
        let user_data = &*sink as *const Box<dyn ValidationSink> as *mut c_void;

        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(forward))
            .user_data(user_data);

        let handle = unsafe { loader.create_debug_utils_messenger(&info, None)? };
        Ok(Self {
            loader,
            handle,
            sink,
        })
    }

    /// Must run before the instance is destroyed.
    pub(crate) fn destroy(self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.handle, None)
        };
        drop(self.sink);
    }
}

unsafe extern "system" fn forward(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if user_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: user_data is the sink box owned by the live Messenger.
    let sink = unsafe { &*(user_data as *const Box<dyn ValidationSink>) };

    let text = if data.is_null() || unsafe { (*data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        // SAFETY: the loader passes a NUL-terminated message for the call.
        unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy()
    };

    sink.message(Severity::from_vk(severity), kind_name(types), &text);
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(Severity, String, String)>>>);

    impl ValidationSink for Recorder {
        fn message(&self, severity: Severity, kind: &str, text: &str) {
            self.0
                .lock()
                .unwrap()
                .push((severity, kind.to_owned(), text.to_owned()));
        }
    }

    #[test]
    fn severity_takes_the_highest_bit() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(Severity::from_vk(S::VERBOSE), Severity::Verbose);
        assert_eq!(Severity::from_vk(S::INFO), Severity::Info);
        assert_eq!(Severity::from_vk(S::WARNING | S::INFO), Severity::Warning);
        assert_eq!(Severity::from_vk(S::ERROR | S::VERBOSE), Severity::Error);
    }

    #[test]
    fn callback_forwards_to_the_sink() {
        let recorder = Recorder::default();
        let sink: Box<Box<dyn ValidationSink>> = Box::new(Box::new(recorder.clone()));
        let user = &*sink as *const Box<dyn ValidationSink> as *mut c_void;

        let msg = CString::new("vkCmdDraw: layout mismatch").unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: msg.as_ptr(),
            ..Default::default()
        };
        let ret = unsafe {
            forward(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                user,
            )
        };
        assert_eq!(ret, vk::FALSE);

        unsafe {
            forward(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                std::ptr::null(),
                user,
            )
        };

        let seen = recorder.0.lock().unwrap();
        assert_eq!(
            seen[0],
            (
                Severity::Error,
                "validation".to_owned(),
                "vkCmdDraw: layout mismatch".to_owned()
            )
        );
        assert_eq!(
            seen[1],
            (Severity::Info, "general".to_owned(), "(no message)".to_owned())
        );
    }
}
