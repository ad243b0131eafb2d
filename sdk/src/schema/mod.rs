pub mod descriptor;
pub mod registry;
pub mod validator;
pub mod wire;
