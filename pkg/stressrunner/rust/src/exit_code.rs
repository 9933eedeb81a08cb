// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Exit codes reported by validation instances and by the runner itself.
//!
//! Positive codes come from the validation tool, negative codes mean the
//! instance was terminated by a signal (`-N` for signal `N`).

pub const OK: i32 = 0;

/// Replaces the raw status of an instance that ignored the safe interrupt and
/// had to be killed. A killed instance never reports a status of its own.
pub const FORCED_KILL: i32 = 32;

pub const RUNNER_TOOL_FAILED: i32 = 254;
pub const UNKNOWN_STATUS_CODE: i32 = 255;

/// Human readable description of an instance exit code.
pub fn describe(code: i32) -> &'static str {
    match code {
        OK => "OK",
        1 => "FLOW_DATA_MISMATCH_ERROR",
        2 => "FLOW_CONFIGURATION_ERROR",
        3 => "PARSER_NOT_SUPPORTED_ERROR",
        4 => "PARSER_NOT_INITIALIZED_ERROR",
        5 => "PARSER_COULD_NOT_INIT_ERROR",
        6 => "PARSER_NODE_DOES_NOT_EXIST_ERROR",
        7 => "XML_ZERO_GLOBAL_ITERATIONS_AND_TIME_ERROR",
        8 => "XML_INVALID_NODE_VALUE_ERROR",
        9 => "XML_NODE_DOES_NOT_EXIST_ERROR",
        10 => "XML_INVALID_REQUESTED_VALUE_ERROR",
        11 => "XML_DUPLICATED_FLOW_ID_ERROR",
        12 => "XML_DUPLICATED_ALGORITHM_ID_ERROR",
        13 => "XML_INPUT_VALUE_LIMIT_REACHED_ERROR",
        14 => "INPUT_VALUE_LIMIT_REACHED_ERROR",
        19 => "FACTORY_LIMIT_REACHED_ERROR",
        22 => "MEMORY_ALLOCATOR_LIMIT_REACHED_ERROR",
        26 => "TOOL_INVALID_TEST_CASE_FILE_ERROR",
        27 => "TOOL_CONFIGURATION_ERROR",
        29 => "A command line argument has an invalid value",
        30 => "The number of arguments is invalid",
        31 => "An invalid combination of parameters (mutually exclusion)",
        FORCED_KILL => "Instance was forcibly killed after ignoring the stop request",
        RUNNER_TOOL_FAILED => "Runner configuration or internal error",
        -1 => "SIGHUP - Hangup detected on controlling terminal",
        -2 => "SIGINT - Interrupt from keyboard",
        -3 => "SIGQUIT - Quit from keyboard",
        -4 => "SIGILL - Illegal Instruction",
        -6 => "SIGABRT - Abort signal from abort(3)",
        -7 => "SIGBUS - Bus error (bad memory access)",
        -8 => "SIGFPE - Floating point exception",
        -9 => "SIGKILL - Kill signal",
        -11 => "SIGSEGV - Invalid memory reference",
        -13 => "SIGPIPE - Broken pipe: write to pipe with no readers",
        -14 => "SIGALRM - Timer signal from alarm(2)",
        -15 => "SIGTERM - Termination signal",
        _ => "An unknown error occurred",
    }
}

/// Map a run status to a process exit code: signal statuses use the shell's
/// `128 + N` convention, everything else is truncated to a byte.
pub fn process_exit_code(status: i32) -> i32 {
    if status < 0 {
        128 + status.saturating_neg().min(127)
    } else {
        status & 0xff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_codes() {
        assert_eq!(describe(OK), "OK");
        assert_eq!(describe(1), "FLOW_DATA_MISMATCH_ERROR");
        assert!(describe(-9).starts_with("SIGKILL"));
        assert!(describe(FORCED_KILL).contains("forcibly killed"));
    }

    #[test]
    fn test_describe_unknown_code() {
        assert_eq!(describe(200), "An unknown error occurred");
        assert_eq!(describe(-64), "An unknown error occurred");
    }

    #[test]
    fn test_process_exit_code() {
        assert_eq!(process_exit_code(OK), 0);
        assert_eq!(process_exit_code(5), 5);
        assert_eq!(process_exit_code(-9), 137);
        assert_eq!(process_exit_code(-2), 130);
        assert_eq!(process_exit_code(300), 300 & 0xff);
    }
}
