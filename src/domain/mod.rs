pub mod command;
pub mod forecast;
pub mod preferences;
pub mod price;
pub mod schedule;
pub mod types;
pub mod zone;

pub use command::*;
pub use forecast::*;
pub use preferences::*;
pub use price::*;
pub use schedule::*;
pub use types::*;
pub use zone::*;
