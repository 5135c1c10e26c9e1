//! Tag pipeline orchestrator.
//!
//! Coordinates the two chained AI stages (vision analysis, then text
//! cleanup) and the dictation path that feeds the same text-cleanup stage.
//! A single-flight lock guards all AI activity: one request in flight at a
//! time, concurrent triggers rejected with a busy status rather than queued.
//!
//! The orchestrator never spawns work itself. Entry points return a
//! [`VisionRequest`] or [`TextRequest`] for the caller to run as a future;
//! the completion lands back here (on the control thread) as a
//! [`VisionOutcome`] or [`TextOutcome`]. Every completion is validated
//! against the image the user is currently looking at, so a result that
//! arrives after navigation is discarded without side effects, and the lock
//! is still released exactly once.

use crate::ai::prompt;
use crate::config::AiConfig;
use crate::session::{merge_tag_text, parse_tags, Decision, ImageId, SessionLedger};

use super::client::AiError;

const BUSY_STATUS: &str = "AI is busy. Please wait for the current analysis to finish.";

/// What the orchestrator needs from the presentation layer.
///
/// Implemented by the application's workspace state, and by a fake in tests.
pub trait Surface {
    /// The image currently presented to the user, if any.
    fn active_image(&self) -> Option<ImageId>;
    fn set_status(&mut self, text: String);
    /// Replace the displayed AI tags wholesale.
    fn replace_ai_tags(&mut self, tags: Vec<String>);
    fn clear_ai_tags(&mut self);
    /// Current manual tag text, trimmed.
    fn manual_tags(&self) -> String;
    fn set_manual_tags(&mut self, text: String);
    /// Currently displayed AI tags (the user may have removed some).
    fn ai_tags(&self) -> Vec<String>;
    /// Ask the application to move to the next image once the current
    /// update step finishes.
    fn request_navigate_next(&mut self);
}

/// Mutual exclusion for AI activity, plus the subject the in-flight
/// pipeline was started for.
///
/// Only ever touched from the control thread, so a plain struct suffices.
#[derive(Debug, Default)]
pub struct AiLock {
    subject: Option<ImageId>,
}

impl AiLock {
    /// Non-blocking acquire. Records `subject` and returns true iff the
    /// lock was free; a held lock rejects the caller with no side effect.
    pub fn try_acquire(&mut self, subject: ImageId) -> bool {
        if self.subject.is_some() {
            return false;
        }
        self.subject = Some(subject);
        true
    }

    /// Free the lock. Releasing an unheld lock is a programming error; it
    /// is logged and otherwise ignored.
    pub fn release(&mut self) {
        if self.subject.take().is_none() {
            tracing::error!("AI lock released while not held");
        }
    }

    pub fn is_held(&self) -> bool {
        self.subject.is_some()
    }

    pub fn subject(&self) -> Option<&ImageId> {
        self.subject.as_ref()
    }
}

/// Releases the lock when dropped, so the text-stage finalizer cannot leak
/// a held lock on any exit path, panics included.
struct ReleaseOnDrop<'a>(&'a mut AiLock);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Dispatch instruction: run the vision model over this image.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub subject: ImageId,
}

/// Dispatch instruction: run the text model with a ready-built prompt.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub subject: ImageId,
    pub prompt: String,
    /// Advance to the next image once this completion is finalized.
    pub advance: bool,
}

/// Completion of a vision call, delivered on the control thread.
#[derive(Debug, Clone)]
pub struct VisionOutcome {
    pub subject: ImageId,
    pub result: Result<String, AiError>,
}

/// Completion of a text-cleanup call, delivered on the control thread.
#[derive(Debug, Clone)]
pub struct TextOutcome {
    pub subject: ImageId,
    pub result: Result<String, AiError>,
    pub advance: bool,
}

/// Does a completed result still belong to the image the user is looking
/// at? Used identically at both pipeline stages.
fn validate_subject(expected: &ImageId, actual: Option<&ImageId>) -> bool {
    actual == Some(expected)
}

/// The orchestrator: owns the single-flight lock and the session ledger,
/// and is the sole writer of both.
pub struct TagPipeline {
    config: AiConfig,
    lock: AiLock,
    ledger: SessionLedger,
}

impl TagPipeline {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            lock: AiLock::default(),
            ledger: SessionLedger::default(),
        }
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Forget every recorded decision. The lock is deliberately left alone:
    /// an in-flight completion will fail subject validation and discard
    /// itself, releasing the lock on its own.
    pub fn reset_session(&mut self) {
        self.ledger.clear();
    }

    /// Vision-path entry: called when a new image becomes active and vision
    /// analysis is enabled. Returns the request to dispatch, or `None` when
    /// the lock is busy.
    pub fn try_start_vision(
        &mut self,
        subject: ImageId,
        surface: &mut impl Surface,
    ) -> Option<VisionRequest> {
        if !self.lock.try_acquire(subject.clone()) {
            tracing::warn!(subject = %subject.file_name(), "AI lock busy, vision trigger rejected");
            surface.set_status(BUSY_STATUS.to_string());
            return None;
        }

        tracing::info!(subject = %subject.file_name(), "Starting vision analysis");
        surface.set_status("Analyzing image with vision AI...".to_string());
        Some(VisionRequest { subject })
    }

    /// Vision-stage completion. On success with non-empty tags, chains into
    /// the text-cleanup stage *without releasing the lock*; on every other
    /// path the lock is released here.
    pub fn on_vision_done(
        &mut self,
        outcome: VisionOutcome,
        surface: &mut impl Surface,
    ) -> Option<TextRequest> {
        if !validate_subject(&outcome.subject, surface.active_image().as_ref()) {
            // Stale, not an error: the user moved on. Silent for this stage.
            tracing::warn!(
                subject = %outcome.subject.file_name(),
                "Discarding stale vision result"
            );
            self.lock.release();
            return None;
        }

        match outcome.result {
            Err(e) => {
                tracing::error!(subject = %outcome.subject.file_name(), error = %e, "Vision analysis failed");
                surface.set_status(format!("Vision Error: {e}."));
                self.lock.release();
                None
            }
            Ok(text) => {
                let tags = text.trim().replace('"', "");
                if tags.is_empty() {
                    tracing::info!(subject = %outcome.subject.file_name(), "Vision produced no tags");
                    self.lock.release();
                    return None;
                }

                // Chain: the lock stays held across the stage boundary.
                tracing::info!(subject = %outcome.subject.file_name(), "Vision tags pass to text cleanup");
                surface.set_status("Cleaning vision tags with text AI...".to_string());
                Some(TextRequest {
                    subject: outcome.subject,
                    prompt: prompt::build_cleanup_prompt(&self.config, &tags),
                    advance: false,
                })
            }
        }
    }

    /// Dictation-path entry: a transcription arrived and AI cleanup is
    /// enabled. When the lock is busy the raw text is appended to the
    /// manual tag field instead, so dictation is never lost.
    pub fn try_start_dictation(
        &mut self,
        transcript: &str,
        surface: &mut impl Surface,
    ) -> Option<TextRequest> {
        let subject = surface.active_image()?;

        if !self.lock.try_acquire(subject.clone()) {
            tracing::warn!("AI lock busy, appending raw transcription");
            surface.set_status(BUSY_STATUS.to_string());
            let manual = surface.manual_tags();
            surface.set_manual_tags(crate::session::append_tag_text(&manual, transcript));
            return None;
        }

        tracing::info!(subject = %subject.file_name(), "Starting text cleanup for transcription");
        surface.set_status("Processing transcribed tags with AI...".to_string());
        Some(TextRequest {
            subject,
            prompt: prompt::build_cleanup_prompt(&self.config, transcript),
            advance: false,
        })
    }

    /// Text-stage completion: the terminal step of both pipeline paths.
    /// The lock is released on every exit from here, unwinding included.
    pub fn on_text_done(&mut self, outcome: TextOutcome, surface: &mut impl Surface) {
        let Self {
            config,
            lock,
            ledger,
        } = self;
        let guard = ReleaseOnDrop(lock);

        if !validate_subject(&outcome.subject, surface.active_image().as_ref()) {
            tracing::warn!(
                subject = %outcome.subject.file_name(),
                "Discarding stale text result"
            );
            surface.set_status(format!(
                "Discarding old AI results for {}",
                outcome.subject.file_name()
            ));
            // Advance is intentionally not applied for a stale result.
            return;
        }

        match outcome.result {
            Err(e) => {
                tracing::error!(subject = %outcome.subject.file_name(), error = %e, "Text cleanup failed");
                surface.set_status(format!("AI Error: {e}."));
            }
            Ok(raw) => {
                let cleaned = prompt::strip_preamble(&raw, &config.preamble_phrases);
                if !cleaned.is_empty() {
                    let tags = parse_tags(&cleaned);
                    tracing::info!(
                        subject = %outcome.subject.file_name(),
                        count = tags.len(),
                        "Applying AI tags"
                    );
                    ledger.set_ai_tags(&outcome.subject, tags.clone());
                    surface.replace_ai_tags(tags);
                }
                surface.set_status("AI processing complete.".to_string());
            }
        }

        // Release before requesting navigation.
        drop(guard);
        if outcome.advance {
            surface.request_navigate_next();
        }
    }

    /// Record a keep/delete verdict for the active image: merge the manual
    /// and AI tags, overwrite the ledger record and advance.
    pub fn record_decision(&mut self, action: Decision, surface: &mut impl Surface) {
        let Some(subject) = surface.active_image() else {
            tracing::warn!("Decision with no image loaded");
            return;
        };

        let manual = surface.manual_tags();
        let ai_tags = surface.ai_tags();
        let merged = merge_tag_text(&manual, &ai_tags);

        tracing::info!(
            subject = %subject.file_name(),
            action = action.label(),
            tags = %merged,
            "Recording decision"
        );
        self.ledger.record_decision(&subject, action, merged, ai_tags);

        surface.set_status(format!("Marked for {}.", action.label()));
        surface.request_navigate_next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ImageId {
        ImageId::new(format!("/photos/{name}"))
    }

    fn pipeline() -> TagPipeline {
        TagPipeline::new(AiConfig::default())
    }

    #[derive(Default)]
    struct FakeSurface {
        active: Option<ImageId>,
        status: String,
        manual: String,
        ai: Vec<String>,
        navigations: usize,
    }

    impl FakeSurface {
        fn showing(name: &str) -> Self {
            Self {
                active: Some(id(name)),
                ..Self::default()
            }
        }
    }

    impl Surface for FakeSurface {
        fn active_image(&self) -> Option<ImageId> {
            self.active.clone()
        }
        fn set_status(&mut self, text: String) {
            self.status = text;
        }
        fn replace_ai_tags(&mut self, tags: Vec<String>) {
            self.ai = tags;
        }
        fn clear_ai_tags(&mut self) {
            self.ai.clear();
        }
        fn manual_tags(&self) -> String {
            self.manual.trim().to_string()
        }
        fn set_manual_tags(&mut self, text: String) {
            self.manual = text;
        }
        fn ai_tags(&self) -> Vec<String> {
            self.ai.clone()
        }
        fn request_navigate_next(&mut self) {
            self.navigations += 1;
        }
    }

    #[test]
    fn test_lock_single_flight() {
        let mut lock = AiLock::default();
        assert!(lock.try_acquire(id("x.jpg")));
        assert!(!lock.try_acquire(id("x.jpg")));
        assert!(!lock.try_acquire(id("y.jpg")));
        assert_eq!(lock.subject(), Some(&id("x.jpg")));

        lock.release();
        assert!(!lock.is_held());
        assert!(lock.try_acquire(id("y.jpg")));
    }

    #[test]
    fn test_lock_release_when_not_held_does_not_panic() {
        let mut lock = AiLock::default();
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_second_vision_trigger_rejected_while_pending() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");

        assert!(p.try_start_vision(id("x.jpg"), &mut surface).is_some());
        // Same image triggered again while the first call is in flight
        assert!(p.try_start_vision(id("x.jpg"), &mut surface).is_none());
        assert_eq!(surface.status, BUSY_STATUS);
        assert_eq!(p.lock.subject(), Some(&id("x.jpg")));
    }

    #[test]
    fn test_vision_chain_to_final_tags() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");

        let vision = p.try_start_vision(id("x.jpg"), &mut surface).unwrap();
        assert_eq!(vision.subject, id("x.jpg"));
        assert_eq!(surface.status, "Analyzing image with vision AI...");

        let chained = p
            .on_vision_done(
                VisionOutcome {
                    subject: id("x.jpg"),
                    result: Ok("dog, beach".to_string()),
                },
                &mut surface,
            )
            .unwrap();
        assert!(chained.prompt.contains("dog, beach"));
        assert!(!chained.advance);
        assert_eq!(surface.status, "Cleaning vision tags with text AI...");
        // The lock is held across the chain boundary
        assert!(p.lock.is_held());
        assert!(p.try_start_vision(id("x.jpg"), &mut surface).is_none());

        p.on_text_done(
            TextOutcome {
                subject: id("x.jpg"),
                result: Ok("Keywords: dog, beach, sunny".to_string()),
                advance: false,
            },
            &mut surface,
        );
        assert_eq!(surface.ai, vec!["dog", "beach", "sunny"]);
        assert_eq!(surface.status, "AI processing complete.");
        assert!(!p.lock.is_held());
        assert_eq!(
            p.ledger().get(&id("x.jpg")).unwrap().ai_tags,
            vec!["dog", "beach", "sunny"]
        );
    }

    #[test]
    fn test_vision_result_after_navigation_is_discarded() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_vision(id("x.jpg"), &mut surface).unwrap();

        // User navigates to y before the vision call returns
        surface.active = Some(id("y.jpg"));
        let before = "Analyzing image with vision AI...".to_string();
        surface.status = before.clone();

        let chained = p.on_vision_done(
            VisionOutcome {
                subject: id("x.jpg"),
                result: Ok("dog, beach".to_string()),
            },
            &mut surface,
        );

        assert!(chained.is_none());
        assert!(!p.lock.is_held());
        // No tags appear on y, and the discard is silent at this stage
        assert!(surface.ai.is_empty());
        assert_eq!(surface.status, before);
        assert!(p.ledger().get(&id("y.jpg")).is_none());
    }

    #[test]
    fn test_vision_error_surfaces_and_releases() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_vision(id("x.jpg"), &mut surface).unwrap();

        let chained = p.on_vision_done(
            VisionOutcome {
                subject: id("x.jpg"),
                result: Err(AiError::Connection("refused".to_string())),
            },
            &mut surface,
        );

        assert!(chained.is_none());
        assert!(!p.lock.is_held());
        assert_eq!(surface.status, "Vision Error: Could not connect to Ollama server.");
    }

    #[test]
    fn test_vision_empty_result_releases_without_chaining() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_vision(id("x.jpg"), &mut surface).unwrap();

        let chained = p.on_vision_done(
            VisionOutcome {
                subject: id("x.jpg"),
                result: Ok("  \"\" ".to_string()),
            },
            &mut surface,
        );

        assert!(chained.is_none());
        assert!(!p.lock.is_held());
    }

    #[test]
    fn test_dictation_builds_cleanup_request() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");

        let request = p
            .try_start_dictation("mason and his dog at the park", &mut surface)
            .unwrap();
        assert_eq!(request.subject, id("x.jpg"));
        assert!(request.prompt.contains("mason and his dog at the park"));
        assert!(p.lock.is_held());
        assert_eq!(surface.status, "Processing transcribed tags with AI...");
    }

    #[test]
    fn test_dictation_falls_back_to_raw_append_when_busy() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        surface.manual = "beach".to_string();
        p.try_start_vision(id("x.jpg"), &mut surface).unwrap();

        let request = p.try_start_dictation("blue car", &mut surface);

        assert!(request.is_none());
        assert_eq!(surface.manual, "beach, blue car");
        assert_eq!(surface.status, BUSY_STATUS);
        // The in-flight pipeline is untouched
        assert_eq!(p.lock.subject(), Some(&id("x.jpg")));
    }

    #[test]
    fn test_dictation_without_active_image_is_noop() {
        let mut p = pipeline();
        let mut surface = FakeSurface::default();
        assert!(p.try_start_dictation("words", &mut surface).is_none());
        assert!(!p.lock.is_held());
    }

    #[test]
    fn test_text_result_after_navigation_is_discarded() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_dictation("a dog", &mut surface).unwrap();

        surface.active = Some(id("y.jpg"));
        p.on_text_done(
            TextOutcome {
                subject: id("x.jpg"),
                result: Ok("dog".to_string()),
                advance: true,
            },
            &mut surface,
        );

        assert!(!p.lock.is_held());
        assert!(surface.ai.is_empty());
        assert!(p.ledger().is_empty());
        assert_eq!(surface.status, "Discarding old AI results for x.jpg");
        // advance is not applied to a stale result
        assert_eq!(surface.navigations, 0);
    }

    #[test]
    fn test_text_error_honors_advance_and_releases() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_dictation("a dog", &mut surface).unwrap();

        p.on_text_done(
            TextOutcome {
                subject: id("x.jpg"),
                result: Err(AiError::Request("status 500".to_string())),
                advance: true,
            },
            &mut surface,
        );

        assert!(!p.lock.is_held());
        assert_eq!(surface.status, "AI Error: Request failed: status 500.");
        assert_eq!(surface.navigations, 1);
    }

    #[test]
    fn test_text_empty_response_completes_without_tags() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_dictation("a dog", &mut surface).unwrap();

        p.on_text_done(
            TextOutcome {
                subject: id("x.jpg"),
                result: Ok("Keywords:".to_string()),
                advance: false,
            },
            &mut surface,
        );

        assert!(!p.lock.is_held());
        assert!(surface.ai.is_empty());
        assert!(p.ledger().is_empty());
        assert_eq!(surface.status, "AI processing complete.");
    }

    #[test]
    fn test_lock_free_for_new_pipeline_after_completion() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        p.try_start_dictation("a dog", &mut surface).unwrap();
        p.on_text_done(
            TextOutcome {
                subject: id("x.jpg"),
                result: Ok("dog".to_string()),
                advance: false,
            },
            &mut surface,
        );

        surface.active = Some(id("y.jpg"));
        assert!(p.try_start_vision(id("y.jpg"), &mut surface).is_some());
    }

    #[test]
    fn test_record_decision_merges_manual_and_ai() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        surface.manual = "a, b".to_string();
        surface.ai = vec!["c".to_string(), "d".to_string()];

        p.record_decision(Decision::Keep, &mut surface);

        let record = p.ledger().get(&id("x.jpg")).unwrap();
        assert_eq!(record.action, Decision::Keep);
        assert_eq!(record.tags, "a, b, c, d");
        assert_eq!(record.ai_tags, vec!["c", "d"]);
        assert_eq!(surface.status, "Marked for KEEP.");
        assert_eq!(surface.navigations, 1);
    }

    #[test]
    fn test_record_decision_without_image_is_noop() {
        let mut p = pipeline();
        let mut surface = FakeSurface::default();
        p.record_decision(Decision::Delete, &mut surface);
        assert!(p.ledger().is_empty());
        assert_eq!(surface.navigations, 0);
    }

    #[test]
    fn test_reset_clears_ledger_but_not_lock() {
        let mut p = pipeline();
        let mut surface = FakeSurface::showing("x.jpg");
        surface.ai = vec!["dog".to_string()];
        p.record_decision(Decision::Keep, &mut surface);
        p.try_start_vision(id("x.jpg"), &mut surface);

        p.reset_session();

        assert!(p.ledger().is_empty());
        // The in-flight completion still owns the lock and will release it
        assert!(p.lock.is_held());
    }
}
