//! What the adapter advertises, and the exception filters it accepts.

use dartdbg_vm::ExceptionPauseMode;

use crate::protocol::{Capabilities, ExceptionBreakpointsFilter};

pub const FILTER_ALL: &str = "All";
pub const FILTER_UNHANDLED: &str = "Unhandled";

/// The `initialize` response body.
pub fn adapter_capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: true,
        supports_conditional_breakpoints: true,
        supports_log_points: true,
        supports_evaluate_for_hovers: true,
        supports_delayed_stack_trace_loading: true,
        supports_terminate_request: true,
        supports_loaded_sources_request: false,
        supports_clipboard_context: true,
        exception_breakpoint_filters: vec![
            ExceptionBreakpointsFilter {
                filter: FILTER_ALL.into(),
                label: "All Exceptions".into(),
                default: false,
            },
            ExceptionBreakpointsFilter {
                filter: FILTER_UNHANDLED.into(),
                label: "Uncaught Exceptions".into(),
                default: true,
            },
        ],
    }
}

/// Map the editor's enabled filters onto a VM pause mode. `All` wins
/// over `Unhandled`; unknown filters are ignored.
pub fn pause_mode_for_filters(filters: &[String]) -> ExceptionPauseMode {
    if filters.iter().any(|f| f == FILTER_ALL) {
        ExceptionPauseMode::All
    } else if filters.iter().any(|f| f == FILTER_UNHANDLED) {
        ExceptionPauseMode::Unhandled
    } else {
        ExceptionPauseMode::None
    }
}
