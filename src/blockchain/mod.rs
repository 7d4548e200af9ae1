pub mod bitcoin;
pub mod esplora;
pub mod resilient;
pub mod rootstock;
pub mod stacks;
pub mod traits;

pub use esplora::EsploraProvider;
pub use resilient::ResilientProvider;
pub use traits::{ChainDataProvider, FeeEstimate, FeePriority};
