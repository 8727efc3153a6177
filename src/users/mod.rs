//! Users API served through the in-flight registry.
//!
//! # Data Flow
//! ```text
//! RouteBridge (http/bridge.rs)
//!     → routes.rs (parse params/body, pick status)
//!     → store.rs (UserStore trait; SqlUserStore over SqlClient)
//!     → model.rs (User, UserInput)
//! ```

pub mod model;
pub mod routes;
pub mod store;

pub use model::{User, UserInput};
pub use routes::{mount, UserError};
pub use store::{SqlUserStore, UserStore};
