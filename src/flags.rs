//! Per-plugin command line flags.
//!
//! A [`FlagSet`] hands out typed [`Flag`] handles and namespaces every flag
//! as `<plugin>.<flag>`. The host turns the collected definitions into clap
//! arguments and writes parsed values back into the handles before `init`.

use crate::error::{HostError, Result};
use clap::{Arg, ArgAction, ArgMatches};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A value that can be set from its command line text.
pub trait FlagValue: Send + Sync {
    fn set(&self, raw: &str) -> std::result::Result<(), String>;

    /// Current value rendered the way it would be typed on the command line.
    fn current(&self) -> String;

    /// Boolean flags may appear without a value.
    fn is_bool(&self) -> bool {
        false
    }
}

/// Types a [`Flag`] can hold.
pub trait FlagType: Clone + Send + Sync + 'static {
    const IS_BOOL: bool = false;

    fn parse_flag(raw: &str) -> std::result::Result<Self, String>;

    fn render_flag(&self) -> String;
}

/// Shared handle to a flag's value.
///
/// Plugins keep a clone and read it from `init` or `run`; the host writes to
/// it once, after parsing the command line.
pub struct Flag<T> {
    value: Arc<RwLock<T>>,
}

impl<T> Clone for Flag<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: FlagType> Flag<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
        }
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    pub fn set_value(&self, value: T) {
        *self.value.write() = value;
    }
}

impl<T: FlagType + Default> Default for Flag<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: FlagType + fmt::Debug> fmt::Debug for Flag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Flag").field(&*self.value.read()).finish()
    }
}

impl<T: FlagType> FlagValue for Flag<T> {
    fn set(&self, raw: &str) -> std::result::Result<(), String> {
        let parsed = T::parse_flag(raw)?;
        self.set_value(parsed);
        Ok(())
    }

    fn current(&self) -> String {
        self.value.read().render_flag()
    }

    fn is_bool(&self) -> bool {
        T::IS_BOOL
    }
}

impl FlagType for bool {
    const IS_BOOL: bool = true;

    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        match raw {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(format!("invalid boolean value {raw:?}")),
        }
    }

    fn render_flag(&self) -> String {
        self.to_string()
    }
}

macro_rules! numeric_flag_type {
    ($($ty:ty),*) => {
        $(
            impl FlagType for $ty {
                fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
                    raw.parse::<$ty>()
                        .map_err(|e| format!("invalid value {raw:?}: {e}"))
                }

                fn render_flag(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

numeric_flag_type!(i32, u32, i64, u64, f64);

impl FlagType for String {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        Ok(raw.to_string())
    }

    fn render_flag(&self) -> String {
        self.clone()
    }
}

impl FlagType for Duration {
    fn parse_flag(raw: &str) -> std::result::Result<Self, String> {
        parse_duration(raw)
    }

    fn render_flag(&self) -> String {
        format_duration(*self)
    }
}

/// A flag registered by a plugin, already carrying its full name.
#[derive(Clone)]
pub struct FlagDefinition {
    name: String,
    usage: String,
    default: String,
    value: Arc<dyn FlagValue>,
}

impl FlagDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }

    pub fn default_value(&self) -> &str {
        &self.default
    }

    pub(crate) fn to_arg(&self) -> Arg {
        let help = if self.default.is_empty() {
            self.usage.clone()
        } else {
            format!("{} (default {})", self.usage, self.default)
        };

        let arg = Arg::new(self.name.clone())
            .long(self.name.clone())
            .help(help)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String));

        if self.value.is_bool() {
            arg.num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true")
        } else {
            arg.num_args(1).allow_hyphen_values(true)
        }
    }
}

impl fmt::Debug for FlagDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagDefinition")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("default", &self.default)
            .finish()
    }
}

/// Flag registration surface handed to a plugin's `set_flags`.
#[derive(Debug)]
pub struct FlagSet {
    prefix: String,
    definitions: Vec<FlagDefinition>,
}

macro_rules! typed_flags {
    ($($new:ident, $bind:ident => $ty:ty;)*) => {
        $(
            pub fn $new(&mut self, name: &str, value: $ty, usage: &str) -> Flag<$ty> {
                let flag = Flag::new(value);
                self.var(Arc::new(flag.clone()), name, usage);
                flag
            }

            pub fn $bind(&mut self, flag: &Flag<$ty>, name: &str, value: $ty, usage: &str) {
                flag.set_value(value);
                self.var(Arc::new(flag.clone()), name, usage);
            }
        )*
    };
}

impl FlagSet {
    /// Creates a set whose flags are all named `<plugin>.<flag>`.
    pub fn new(plugin: &str) -> Self {
        Self {
            prefix: format!("{plugin}."),
            definitions: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    typed_flags! {
        bool, bool_var => bool;
        int, int_var => i32;
        uint, uint_var => u32;
        int64, int64_var => i64;
        uint64, uint64_var => u64;
        float64, float64_var => f64;
        string, string_var => String;
        duration, duration_var => Duration;
    }

    /// Registers any settable value. The current value is shown as default.
    ///
    /// Panics if the flag name is already taken in this set.
    pub fn var(&mut self, value: Arc<dyn FlagValue>, name: &str, usage: &str) {
        let full_name = format!("{}{}", self.prefix, name);
        if self.definitions.iter().any(|d| d.name == full_name) {
            panic!("flag redefined: {full_name}");
        }

        self.definitions.push(FlagDefinition {
            default: value.current(),
            name: full_name,
            usage: usage.to_string(),
            value,
        });
    }

    pub fn definitions(&self) -> &[FlagDefinition] {
        &self.definitions
    }

    pub fn into_definitions(self) -> Vec<FlagDefinition> {
        self.definitions
    }
}

/// Writes every flag given on the command line into its handle.
pub(crate) fn apply(definitions: &[FlagDefinition], matches: &ArgMatches) -> Result<()> {
    for definition in definitions {
        if let Some(raw) = matches.get_one::<String>(&definition.name) {
            definition
                .value
                .set(raw)
                .map_err(|message| HostError::Flag {
                    flag: definition.name.clone(),
                    message,
                })?;
        }
    }
    Ok(())
}

const NANOSECOND: f64 = 1.0;
const MICROSECOND: f64 = 1_000.0 * NANOSECOND;
const MILLISECOND: f64 = 1_000.0 * MICROSECOND;
const SECOND: f64 = 1_000.0 * MILLISECOND;
const MINUTE: f64 = 60.0 * SECOND;
const HOUR: f64 = 60.0 * MINUTE;

/// Parses durations such as `300ms`, `1.5h` or `2h45m`.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let input = raw.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() || input.starts_with('-') {
        return Err(format!("invalid duration {raw:?}"));
    }

    let input = input.strip_prefix('+').unwrap_or(input);
    let mut rest = input;
    let mut total = 0.0_f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {raw:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => NANOSECOND,
            "us" | "µs" | "μs" => MICROSECOND,
            "ms" => MILLISECOND,
            "s" => SECOND,
            "m" => MINUTE,
            "h" => HOUR,
            "" => return Err(format!("missing unit in duration {raw:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {raw:?}")),
        };

        total += value * scale;
        rest = next;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(format!("duration {raw:?} out of range"));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

/// Renders a duration as `1h2m3.5s`, `250ms` or `0s`.
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", nanos as f64 / MICROSECOND);
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", nanos as f64 / MILLISECOND);
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    let subsec = duration.subsec_nanos();

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if subsec == 0 {
        out.push_str(&format!("{secs}s"));
    } else {
        out.push_str(&format!("{}s", secs as f64 + f64::from(subsec) / SECOND));
    }
    out
}
