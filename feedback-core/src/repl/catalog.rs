//! Command table shared by the parser and the help surface.
//!
//! Each entry names the keyword, its positional argument shape, and the
//! `key=value` assignments it accepts, so parsing and `help` output cannot
//! drift apart.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Feedback,
    Sampling,
    Retry,
    Sweep,
    Electrode,
    Voltage,
    Frequency,
    Run,
    Calibrate,
    Status,
    Help,
}

/// Assignment keys understood across all commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyTag {
    SamplingTime,
    Samples,
    Delay,
    Threshold,
    Increase,
    Repeats,
    Start,
    End,
    Steps,
    Area,
}

/// Literal accepted on the right-hand side of an assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSpec {
    /// Unsigned integer.
    Integer,
    /// Integer, decimal, or exponent literal.
    Number,
    /// Number, or `auto` to defer to the calibrated baseline.
    Threshold,
}

/// Positional argument that follows the command keyword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Positional {
    None,
    /// `on` or `off`.
    Toggle,
    /// `frequency` or `voltage`.
    SweepKind,
    /// Comma-separated channel indices.
    Channels,
    /// A single numeric setpoint.
    Number,
    /// Optional help topic.
    Topic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeySpec {
    pub name: &'static str,
    pub tag: KeyTag,
    pub value: ValueSpec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub positional: Positional,
    pub keys: &'static [KeySpec],
    pub usage: &'static str,
    pub summary: &'static str,
}

const SAMPLING_KEYS: &[KeySpec] = &[
    KeySpec {
        name: "time",
        tag: KeyTag::SamplingTime,
        value: ValueSpec::Integer,
    },
    KeySpec {
        name: "samples",
        tag: KeyTag::Samples,
        value: ValueSpec::Integer,
    },
    KeySpec {
        name: "delay",
        tag: KeyTag::Delay,
        value: ValueSpec::Integer,
    },
];

const RETRY_KEYS: &[KeySpec] = &[
    KeySpec {
        name: "threshold",
        tag: KeyTag::Threshold,
        value: ValueSpec::Threshold,
    },
    KeySpec {
        name: "increase",
        tag: KeyTag::Increase,
        value: ValueSpec::Number,
    },
    KeySpec {
        name: "repeats",
        tag: KeyTag::Repeats,
        value: ValueSpec::Integer,
    },
];

const SWEEP_KEYS: &[KeySpec] = &[
    KeySpec {
        name: "start",
        tag: KeyTag::Start,
        value: ValueSpec::Number,
    },
    KeySpec {
        name: "end",
        tag: KeyTag::End,
        value: ValueSpec::Number,
    },
    KeySpec {
        name: "steps",
        tag: KeyTag::Steps,
        value: ValueSpec::Integer,
    },
];

const ELECTRODE_KEYS: &[KeySpec] = &[KeySpec {
    name: "area",
    tag: KeyTag::Area,
    value: ValueSpec::Number,
}];

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "feedback",
        tag: CommandTag::Feedback,
        positional: Positional::Toggle,
        keys: &[],
        usage: "feedback on|off",
        summary: "enable or disable impedance feedback for the step",
    },
    CommandSpec {
        name: "sampling",
        tag: CommandTag::Sampling,
        positional: Positional::None,
        keys: SAMPLING_KEYS,
        usage: "sampling [time=<ms>] [samples=<n>] [delay=<ms>]",
        summary: "set the sampling window, sample count, and inter-sample delay",
    },
    CommandSpec {
        name: "retry",
        tag: CommandTag::Retry,
        positional: Positional::None,
        keys: RETRY_KEYS,
        usage: "retry [threshold=<F/mm2>|auto] [increase=<V>] [repeats=<n>]",
        summary: "repeat with escalating voltage until the capacitance threshold is met",
    },
    CommandSpec {
        name: "sweep",
        tag: CommandTag::Sweep,
        positional: Positional::SweepKind,
        keys: SWEEP_KEYS,
        usage: "sweep frequency|voltage [start=<x>] [end=<x>] [steps=<n>]",
        summary: "measure once per linearly spaced frequency or voltage",
    },
    CommandSpec {
        name: "electrode",
        tag: CommandTag::Electrode,
        positional: Positional::Channels,
        keys: ELECTRODE_KEYS,
        usage: "electrode <ch>[,<ch>...] area=<mm2>",
        summary: "select the actuated channels and their total area",
    },
    CommandSpec {
        name: "voltage",
        tag: CommandTag::Voltage,
        positional: Positional::Number,
        keys: &[],
        usage: "voltage <V>",
        summary: "set the applied actuation voltage",
    },
    CommandSpec {
        name: "frequency",
        tag: CommandTag::Frequency,
        positional: Positional::Number,
        keys: &[],
        usage: "frequency <Hz>",
        summary: "set the actuation waveform frequency",
    },
    CommandSpec {
        name: "run",
        tag: CommandTag::Run,
        positional: Positional::None,
        keys: &[],
        usage: "run",
        summary: "run the step's feedback action",
    },
    CommandSpec {
        name: "calibrate",
        tag: CommandTag::Calibrate,
        positional: Positional::None,
        keys: &[],
        usage: "calibrate",
        summary: "measure the selected electrode and store the capacitance baseline",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        positional: Positional::None,
        keys: &[],
        usage: "status",
        summary: "show the step options, electrode selection, and baseline",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        positional: Positional::Topic,
        keys: &[],
        usage: "help [command]",
        summary: "list commands or describe one",
    },
];

/// Looks up a command by keyword, ignoring ASCII case.
#[must_use]
pub fn find(keyword: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(keyword))
}

/// Looks up an assignment key within `keys`, ignoring ASCII case.
#[must_use]
pub fn find_key(keys: &'static [KeySpec], name: &str) -> Option<&'static KeySpec> {
    keys.iter().find(|key| key.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let spec = find("SwEeP").expect("sweep is registered");
        assert_eq!(spec.tag, CommandTag::Sweep);
        assert!(find("reboot").is_none());
    }

    #[test]
    fn keyword_names_are_unique() {
        for (index, spec) in COMMANDS.iter().enumerate() {
            assert!(
                COMMANDS[index + 1..]
                    .iter()
                    .all(|other| !other.name.eq_ignore_ascii_case(spec.name)),
                "duplicate keyword {}",
                spec.name
            );
        }
    }

    #[test]
    fn keys_resolve_within_their_command() {
        let retry = find("retry").expect("retry is registered");
        assert_eq!(
            find_key(retry.keys, "REPEATS").map(|key| key.tag),
            Some(KeyTag::Repeats)
        );
        assert!(find_key(retry.keys, "steps").is_none());
    }
}
