//! Speech provider implementations
//!
//! One module per provider; each maps its API's failure codes into the
//! shared `SynthesisError` taxonomy and returns raw response bytes for the
//! normalize step.

mod elevenlabs;
mod endpoint;
mod google;
mod openai;
mod stub;

pub use elevenlabs::ElevenLabsProvider;
pub use endpoint::EndpointProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use stub::StubProvider;
