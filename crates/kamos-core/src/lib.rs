//! KAMOS RELAY — Core library.
//! Phase loop, stream transport, sessions and matrix orchestration around the Kamos analysis API.

pub mod analysis;
pub mod config;
pub mod error;
pub mod event;
pub mod generator;
pub mod history;
pub mod matrix;
pub mod phase_loop;
pub mod prompts;
pub mod session;
pub mod splitter;
pub mod stream;

pub use analysis::{image_mime_type, AnalysisClient, AnalysisFlags, ImageContent, KamosClient};
pub use config::RelayConfig;
pub use error::{RelayError, RelayResult, Service, TransportCause};
pub use event::{PhaseEvent, PhaseResult, Progress, Role, WRAP_UP_DIRECTIVE, WRAP_UP_TITLE};
pub use generator::{strip_code_fence, Completion, CompletionRequest, DirectiveGenerator, GeminiClient};
pub use history::{History, HistorySnapshot};
pub use matrix::{clamp_matrix_size, GrandReport, GrandSynthesis, MatrixOrchestrator, SynthesisOutcome};
pub use phase_loop::{LoopReport, LoopState, PhaseLoop};
pub use session::{RemoteLoop, RemoteLoopClient, SessionOutcome, SessionPhase, SessionRunner};
pub use splitter::TaskSplitter;
pub use stream::{decode_stream, encode_frame, ByteStream, FrameDecoder, StreamValidator};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
