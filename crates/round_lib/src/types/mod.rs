pub mod config_account;
pub mod enums;
pub mod records;
pub mod round_account;

pub use config_account::*;
pub use enums::*;
pub use records::*;
pub use round_account::*;
