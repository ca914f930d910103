pub mod inventory;
pub mod item;
pub mod item_types;
pub mod stats;
pub mod validator;
