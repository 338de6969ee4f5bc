#![no_main]

use libfuzzer_sys::fuzz_target;

use std::collections::BTreeMap;

use hearthside::home::{Area, Device, EntityState, HomeContext};
use hearthside::prompt::PromptTemplate;

/// Compiles arbitrary template source and, when it compiles, renders it
/// against a small fixed home snapshot.
///
/// This catches:
/// - Panics in template compilation on malformed source
/// - Panics during rendering, where user templates meet real context data
fn compile_and_render(data: &[u8]) {
    let source = match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    let template = match PromptTemplate::new(source) {
        Ok(t) => t,
        Err(_) => return, // Rejected source is fine, just not a panic
    };

    let mut states = BTreeMap::new();
    states.insert("light.porch".to_string(), EntityState::new("off"));
    let context = HomeContext::new(
        "Fuzz House",
        "09:30 AM on Friday August 22, 2026",
        vec![Area {
            id: "porch".to_string(),
            name: "Porch".to_string(),
        }],
        vec![Device {
            id: "light.porch".to_string(),
            area_id: Some("porch".to_string()),
            name: "Porch Light".to_string(),
            domain: "light".to_string(),
            aliases: Vec::new(),
        }],
        states,
    );

    // Render errors are expected for templates referencing unknown fields
    let _ = template.render(&context);
}

fuzz_target!(|data: &[u8]| {
    compile_and_render(data);
});
