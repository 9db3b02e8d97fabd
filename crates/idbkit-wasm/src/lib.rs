//! idbkit JavaScript bindings
//!
//! Exposes the database layer to JavaScript through wasm-bindgen:
//!
//! ```js
//! const db = new Database("app", [
//!   { name: "users", fields: { 1: { email: { index: true, unique: true } } } },
//! ]);
//! const users = db.getStore("users");
//! const alice = await users.create({ email: "alice@example.com" });
//! await users.getByField("email", "alice@example.com");
//! ```
//!
//! Every store method returns a Promise. Rejections are `Error` objects whose
//! `name` is the engine exception name (`ConstraintError`, `NotFoundError`,
//! ...) and whose `message` describes the failure.

mod browser;

pub use browser::{JsDatabase, JsStore};
