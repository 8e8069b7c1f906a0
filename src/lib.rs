//! Reverse-Minesweeper playing engine.
//!
//! The engine picks which cell to probe, takes the answer from an external
//! oracle and works out which hidden cells are provably mines. Everything it
//! cannot prove it ranks by estimated risk. A persistent memory, keyed by
//! grid-size independent positions, biases openings and risk estimates
//! across games.
//!
//! Native callers use [`GameSession`]; the wasm32 build exports the same
//! session to JavaScript as `WasmSweeper`.

pub mod board;
pub mod config;
pub mod constraint;
pub mod error;
pub mod gaussian;
pub mod game;
pub mod grid;
pub mod memory;
pub mod probability;
pub mod rng;
pub mod selector;
pub mod types;

pub use board::{MineField, Oracle, SafeZone};
pub use config::EngineConfig;
pub use error::{EngineError, PersistenceError};
pub use game::{GameSession, GameSnapshot};
pub use grid::Grid;
pub use memory::{InMemoryStore, JsonFileStore, KeyValueStore, MemoryEngine};
pub use selector::{Action, Outcome};
pub use types::{CellValue, Position, Provenance};

// ─── WASM Exports (only compiled for wasm32 target) ─────────────────────────

#[cfg(target_arch = "wasm32")]
mod wasm_exports {
    use serde::Serialize;
    use serde_wasm_bindgen::{from_value, to_value, Serializer};
    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;

    use crate::config::EngineConfig;
    use crate::error::PersistenceError;
    use crate::game::GameSession;
    use crate::memory::KeyValueStore;

    fn to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
        JsValue::from_str(&error.to_string())
    }

    fn backend_error(value: JsValue) -> PersistenceError {
        PersistenceError::Backend(value.as_string().unwrap_or_else(|| format!("{value:?}")))
    }

    /// Adapter over a JS object exposing `get(key)` and `set(key, value)`.
    /// A missing object makes every call a no-op.
    struct JsStore {
        backend: JsValue,
    }

    impl JsStore {
        fn method(&self, name: &str) -> Result<Option<js_sys::Function>, PersistenceError> {
            if self.backend.is_undefined() || self.backend.is_null() {
                return Ok(None);
            }
            let f = js_sys::Reflect::get(&self.backend, &JsValue::from_str(name)).map_err(backend_error)?;
            f.dyn_into::<js_sys::Function>()
                .map(Some)
                .map_err(|_| PersistenceError::Backend(format!("store has no `{name}` function")))
        }
    }

    impl KeyValueStore for JsStore {
        fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
            let Some(get) = self.method("get")? else {
                return Ok(None);
            };
            let raw = get
                .call1(&self.backend, &JsValue::from_str(key))
                .map_err(backend_error)?;
            if raw.is_undefined() || raw.is_null() {
                return Ok(None);
            }
            from_value(raw)
                .map(Some)
                .map_err(|e| PersistenceError::Backend(e.to_string()))
        }

        fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
            let Some(set) = self.method("set")? else {
                return Ok(());
            };
            let js = value
                .serialize(&Serializer::json_compatible())
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
            set.call2(&self.backend, &JsValue::from_str(key), &js)
                .map_err(backend_error)?;
            Ok(())
        }
    }

    #[wasm_bindgen]
    pub struct WasmSweeper {
        session: GameSession<JsStore>,
    }

    #[wasm_bindgen]
    impl WasmSweeper {
        /// `store` is an object with `get`/`set`, or undefined for an
        /// in-memory session. `config` is a partial `EngineConfig`.
        #[wasm_bindgen(constructor)]
        pub fn new(store: JsValue, config: JsValue) -> Result<WasmSweeper, JsValue> {
            let config: EngineConfig = if config.is_undefined() || config.is_null() {
                EngineConfig::default()
            } else {
                from_value(config).map_err(to_js_error)?
            };
            Ok(WasmSweeper {
                session: GameSession::new(config, JsStore { backend: store }),
            })
        }

        /// Register a callback receiving the full state after every event.
        #[wasm_bindgen(js_name = "setObserver")]
        pub fn set_observer(&mut self, callback: js_sys::Function) {
            self.session.set_observer(move |snapshot| {
                if let Ok(value) = to_value(snapshot) {
                    let _ = callback.call1(&JsValue::NULL, &value);
                }
            });
        }

        #[wasm_bindgen(js_name = "startNewGame")]
        pub fn start_new_game(&mut self, rows: usize, cols: usize) -> Result<(), JsValue> {
            self.session.start_new_game(rows, cols).map_err(to_js_error)
        }

        /// Returns `{ type: "probe" | "flag-batch" | "finished" | "error", ... }`.
        #[wasm_bindgen(js_name = "nextAction")]
        pub fn next_action(&mut self) -> Result<JsValue, JsValue> {
            to_value(&self.session.next_action()).map_err(to_js_error)
        }

        /// Returns `"victory"`, `"defeat"` or `undefined` while the game goes on.
        #[wasm_bindgen(js_name = "submitGroundTruth")]
        pub fn submit_ground_truth(&mut self, value: &str) -> Result<JsValue, JsValue> {
            let outcome = self.session.submit_ground_truth(value).map_err(to_js_error)?;
            to_value(&outcome).map_err(to_js_error)
        }

        #[wasm_bindgen(js_name = "resetMemory")]
        pub fn reset_memory(&mut self) {
            self.session.reset_memory();
        }

        #[wasm_bindgen(js_name = "getCurrentState")]
        pub fn current_state(&self) -> Result<JsValue, JsValue> {
            match self.session.current_state() {
                Some(snapshot) => to_value(&snapshot).map_err(to_js_error),
                None => Ok(JsValue::NULL),
            }
        }

        #[wasm_bindgen(js_name = "memoryStats")]
        pub fn memory_stats(&self) -> Result<JsValue, JsValue> {
            to_value(&self.session.memory().stats()).map_err(to_js_error)
        }
    }

    /// Ping function to verify WASM is loaded.
    #[wasm_bindgen(js_name = "ping")]
    pub fn wasm_ping() -> String {
        "minesweeper agent ready".to_string()
    }
}
