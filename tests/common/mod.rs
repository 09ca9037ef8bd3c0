pub mod builders;
pub mod mock_caller;
pub mod strategies;

pub use builders::*;
pub use mock_caller::*;
