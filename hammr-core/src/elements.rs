//! Built-in pipeline elements.

mod constant_timer;
mod counter;
mod dummy_sampler;
mod response_assertion;
mod response_extractor;
mod user_parameters;

pub use constant_timer::ConstantTimer;
pub use counter::Counter;
pub use dummy_sampler::DummySampler;
pub use response_assertion::ResponseAssertion;
pub use response_extractor::{ResponseExtractor, ResponseField};
pub use user_parameters::UserParameters;
