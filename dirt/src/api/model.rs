//! Model lookups. On a type miss the guest's own default argument word is
//! handed straight back, so a missing string key returns the caller's
//! default pointer and a missing float returns the caller's float bits.

use std::sync::Arc;

use loam::CallValue;

use crate::app::AppShared;
use crate::model::Value;

use super::ApiRegistry;

pub(super) fn register(api: &mut ApiRegistry, app: &Arc<AppShared>) {
    {
        let model = app.model.clone();
        api.insert("getFloat", move |args| {
            let key = args.get_str(0);
            let default = args.get(1);
            match model.get(&key) {
                Value::Float(value) => CallValue::F32(value),
                _ => CallValue::U32(default),
            }
        });
    }

    {
        let model = app.model.clone();
        api.insert("getString", move |args| {
            let key = args.get_str(0);
            let default = args.get(1);
            match model.get(&key) {
                Value::String(value) => CallValue::Str(value),
                _ => CallValue::U32(default),
            }
        });
    }
}
