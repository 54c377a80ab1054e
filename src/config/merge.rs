//! Merging of recorder configuration layers
//!
//! Layers are applied builtin, then user (`~/.config/epi/recorder.toml`),
//! then project (`.epi/recorder.toml`), then programmatic overrides. A
//! project file therefore refines the user's settings table by table: it
//! can switch `store.backend` while the user's `store.path` still applies.
//! A project `redaction.rules` list replaces the user's list outright
//! rather than extending it, so rule order stays that of a single file.

use serde_json::Value;

/// Apply `overlay` (the higher-precedence layer) onto `base`.
///
/// Tables merge key by key. Any other overlay value, `null` included,
/// takes the place of the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    let (mut table, overlay_table) = match (base, overlay) {
        (Value::Object(table), Value::Object(overlay_table)) => (table, overlay_table),
        (_, overlay) => return overlay,
    };

    for (key, overlay_value) in overlay_table {
        match table.get_mut(&key) {
            Some(slot) => {
                let base_value = slot.take();
                *slot = deep_merge(base_value, overlay_value);
            }
            None => {
                table.insert(key, overlay_value);
            }
        }
    }
    Value::Object(table)
}

/// Fold layers lowest precedence first: builtin, user, project, overrides.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
