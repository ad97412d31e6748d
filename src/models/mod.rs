pub mod email;
pub mod enums;
pub mod job_record;

pub use email::*;
pub use enums::*;
pub use job_record::*;
