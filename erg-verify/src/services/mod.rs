//! Verification pipeline services
//!
//! Hasher → DuplicateDetector / BehavioralAnalyzer / VisionOracle (run
//! concurrently) → DecisionFusion, orchestrated by SubmissionService.
//! ReviewResolver settles what fusion escalates.

pub mod behavioral_analyzer;
pub mod decision_fusion;
pub mod duplicate_detector;
pub mod hasher;
pub mod review_resolver;
pub mod submission;
pub mod vision_oracle;

pub use behavioral_analyzer::{BehavioralAnalyzer, BehavioralResult};
pub use decision_fusion::{fuse, merge_flags, FusionVerdict};
pub use duplicate_detector::{DuplicateDetector, DuplicateResult};
pub use review_resolver::{ResolutionOutcome, ReviewAction, ReviewResolver};
pub use submission::{SubmissionRequest, SubmissionService, VerificationOutcome};
pub use vision_oracle::{GeminiVisionClient, OracleSettings, VisionOracle, VisionResult};
