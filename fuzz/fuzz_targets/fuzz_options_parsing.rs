#![no_main]

use libfuzzer_sys::fuzz_target;

use hearthside::config::AgentSettings;
use serde_json::Value;

/// Feeds arbitrary JSON through the full option validation path, the same
/// one a host hands untrusted config entries to.
///
/// This catches:
/// - Panics on adversarial option values (huge numbers, wrong types,
///   deeply nested structures in place of scalars)
/// - Panics while formatting the collected error report
fn parse_options(data: &[u8]) {
    let options: Value = match serde_json::from_slice(data) {
        Ok(v) => v,
        Err(_) => return, // Invalid JSON is fine, just not a panic
    };

    match AgentSettings::from_options(&options) {
        Ok(settings) => {
            // Round-tripping accepted options must also not panic
            let _ = settings.to_options();
        }
        Err(errors) => {
            let _ = errors.to_string().len();
        }
    }
}

fuzz_target!(|data: &[u8]| {
    parse_options(data);
});
