//! Command output rendering: human text or `--json`.

use serde_json::Value;

/// Anything a command can print.
pub trait CommandOutput {
    fn to_human(&self) -> String;
    fn to_json(&self) -> Value;
}

/// Print a command result in the requested mode.
pub fn output<T: CommandOutput>(data: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&data.to_json()).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        println!("{}", data.to_human());
    }
}
