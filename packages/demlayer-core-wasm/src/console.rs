// Browser console on wasm32, the `log` facade everywhere else.
// The console_* macros are defined in lib.rs to avoid duplication.

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    // Use `js_namespace` to bind `console.log(..)` instead of just `log(..)`
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);

    #[wasm_bindgen(js_namespace = console, js_name = debug)]
    fn console_debug(s: &str);
}

#[cfg(target_arch = "wasm32")]
pub fn warn(s: &str) {
    web_sys::console::warn_1(&JsValue::from_str(s));
}

#[cfg(target_arch = "wasm32")]
pub fn error(s: &str) {
    web_sys::console::error_1(&JsValue::from_str(s));
}

#[cfg(target_arch = "wasm32")]
pub fn debug(s: &str) {
    console_debug(s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log(s: &str) {
    log::info!(target: "demlayer", "{}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn warn(s: &str) {
    log::warn!(target: "demlayer", "{}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn error(s: &str) {
    log::error!(target: "demlayer", "{}", s);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn debug(s: &str) {
    log::debug!(target: "demlayer", "{}", s);
}
