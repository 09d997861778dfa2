pub mod annotations;
pub mod constants;
pub mod errors;
pub mod kubernetes;
pub mod parsing;
pub mod ports;
pub mod quantity;
pub mod traits;
pub mod values;
pub mod version;
