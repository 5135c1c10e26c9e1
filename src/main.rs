//! Photo triage: review images one at a time, dictate or type tags, mark
//! keep/delete, and commit the decisions to disk.
//!
//! The iced update loop is the single control thread. AI calls and image
//! decodes run as background futures via `Task::perform`, the dictation
//! listener lives on its own thread, and every completion comes back here
//! as a `Message` before any shared state is touched.

use iced::widget::{button, checkbox, column, container, horizontal_space, row, text, text_input, Row};
use iced::{Alignment, Element, Length, Task, Theme};
use rfd::FileDialog;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex as AsyncMutex;
use tracing_subscriber::EnvFilter;

mod ai;
mod audio;
mod config;
mod files;
mod session;

use ai::client::OllamaClient;
use ai::pipeline::{Surface, TagPipeline, TextOutcome, TextRequest, VisionOutcome, VisionRequest};
use audio::transcriber::MicTranscriber;
use audio::{AudioEvent, AudioHandler};
use config::Config;
use session::{append_tag_text, Decision, ImageId};

type ImageHandle = iced::widget::image::Handle;

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    SelectFolder,
    ImageLoaded(ImageId, Result<ImageHandle, String>),
    NextImage,
    PrevImage,
    RotateImage,
    KeepImage,
    DeleteImage,
    ManualTagsChanged(String),
    RemoveAiTag(usize),
    AiToggled(bool),
    VisionToggled(bool),
    RecordPressed,
    CommitChanges,
    /// One event from the dictation worker; `None` means the channel closed.
    Audio(Option<AudioEvent>),
    VisionDone(VisionOutcome),
    TextDone(TextOutcome),
}

/// UI-facing state the tag pipeline reads and writes through the
/// [`Surface`] trait: the working set, the tag fields, the status line.
#[derive(Default)]
struct Workspace {
    images: Vec<ImageId>,
    current: Option<usize>,
    manual_tags: String,
    ai_tags: Vec<String>,
    status: String,
    navigate_next: bool,
}

impl Workspace {
    fn take_navigate(&mut self) -> bool {
        std::mem::take(&mut self.navigate_next)
    }

    /// The "Image i of n | name" line shown while idle on an image.
    fn image_counter_status(&self) -> Option<String> {
        let index = self.current?;
        let id = self.images.get(index)?;
        Some(format!(
            "Image {} of {} | {}",
            index + 1,
            self.images.len(),
            id.file_name()
        ))
    }
}

impl Surface for Workspace {
    fn active_image(&self) -> Option<ImageId> {
        self.current.and_then(|i| self.images.get(i).cloned())
    }

    fn set_status(&mut self, text: String) {
        self.status = text;
    }

    fn replace_ai_tags(&mut self, tags: Vec<String>) {
        self.ai_tags = tags;
    }

    fn clear_ai_tags(&mut self) {
        self.ai_tags.clear();
    }

    fn manual_tags(&self) -> String {
        self.manual_tags.trim().to_string()
    }

    fn set_manual_tags(&mut self, text: String) {
        self.manual_tags = text;
    }

    fn ai_tags(&self) -> Vec<String> {
        self.ai_tags.clone()
    }

    fn request_navigate_next(&mut self) {
        self.navigate_next = true;
    }
}

/// Main application state
struct PhotoTriage {
    config: Config,
    client: Arc<OllamaClient>,
    pipeline: TagPipeline,
    audio: AudioHandler,
    audio_events: Arc<AsyncMutex<UnboundedReceiver<AudioEvent>>>,
    workspace: Workspace,
    /// The folder the current session was loaded from
    folder: Option<PathBuf>,
    /// Pending display rotation per image, in clockwise degrees
    rotations: HashMap<ImageId, u32>,
    displayed: Option<(ImageId, ImageHandle)>,
    ai_enabled: bool,
    vision_enabled: bool,
    listening: bool,
}

impl PhotoTriage {
    fn new() -> (Self, Task<Message>) {
        let config = Config::load();

        // If this fails, we panic because the app cannot function without
        // its HTTP client
        let client = Arc::new(
            OllamaClient::new(config.ai.clone()).expect("Failed to initialize AI backend client"),
        );

        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let audio_config = config.audio.clone();
        let audio = AudioHandler::spawn(move || MicTranscriber::new(audio_config), event_tx);
        let audio_events = Arc::new(AsyncMutex::new(event_rx));

        let app = PhotoTriage {
            pipeline: TagPipeline::new(config.ai.clone()),
            ai_enabled: config.ai.enabled_by_default,
            vision_enabled: config.ai.enabled_by_default,
            client,
            audio,
            audio_events: Arc::clone(&audio_events),
            workspace: Workspace {
                status: "Welcome! Please select a folder to begin.".to_string(),
                ..Workspace::default()
            },
            folder: None,
            rotations: HashMap::new(),
            displayed: None,
            listening: false,
            config,
        };

        let pump = Task::perform(next_audio_event(audio_events), Message::Audio);
        (app, pump)
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::SelectFolder => self.select_folder(),
            Message::ImageLoaded(id, result) => {
                // Ignore a decode that finished after navigation
                if self.workspace.active_image().as_ref() == Some(&id) {
                    match result {
                        Ok(handle) => self.displayed = Some((id, handle)),
                        Err(e) => {
                            tracing::error!(image = %id.file_name(), error = %e, "Image load failed");
                            self.workspace.status = format!("Error loading {}", id.file_name());
                        }
                    }
                }
                Task::none()
            }
            Message::NextImage => self.step(1),
            Message::PrevImage => self.step(-1),
            Message::RotateImage => self.rotate_current(),
            Message::KeepImage => self.record_decision(Decision::Keep),
            Message::DeleteImage => self.record_decision(Decision::Delete),
            Message::ManualTagsChanged(value) => {
                self.workspace.manual_tags = value;
                Task::none()
            }
            Message::RemoveAiTag(index) => {
                if index < self.workspace.ai_tags.len() {
                    self.workspace.ai_tags.remove(index);
                }
                Task::none()
            }
            Message::AiToggled(enabled) => {
                self.ai_enabled = enabled;
                Task::none()
            }
            Message::VisionToggled(enabled) => {
                self.vision_enabled = enabled;
                Task::none()
            }
            Message::RecordPressed => {
                self.start_listening();
                Task::none()
            }
            Message::CommitChanges => self.commit_changes(),
            Message::Audio(event) => self.on_audio_event(event),
            Message::VisionDone(outcome) => {
                match self.pipeline.on_vision_done(outcome, &mut self.workspace) {
                    Some(request) => self.dispatch_text(request),
                    None => Task::none(),
                }
            }
            Message::TextDone(outcome) => {
                self.pipeline.on_text_done(outcome, &mut self.workspace);
                if self.workspace.take_navigate() {
                    self.advance_next()
                } else {
                    Task::none()
                }
            }
        }
    }

    fn select_folder(&mut self) -> Task<Message> {
        let Some(folder) = FileDialog::new()
            .set_title("Select Folder with Photos")
            .pick_folder()
        else {
            tracing::debug!("Folder selection cancelled");
            return Task::none();
        };

        tracing::info!(folder = %folder.display(), "Folder selected");
        let images = files::list_images(&folder);
        if images.is_empty() {
            self.workspace.status =
                "No valid image files found. Select a folder with valid images.".to_string();
            return Task::none();
        }

        self.folder = Some(folder);
        self.pipeline.reset_session();
        self.rotations.clear();
        self.displayed = None;
        self.workspace.images = images;
        self.workspace.current = Some(0);
        self.load_current()
    }

    /// Make the image at `workspace.current` active: restore its tags from
    /// the ledger, kick off the bitmap decode, trigger vision analysis if
    /// enabled, and start listening for dictation.
    fn load_current(&mut self) -> Task<Message> {
        let Some(id) = self.workspace.active_image() else {
            return Task::none();
        };
        tracing::info!(image = %id.file_name(), "Loading image");

        let record = self.pipeline.ledger().get(&id);
        self.workspace.manual_tags = record.map(|r| r.tags.clone()).unwrap_or_default();
        self.workspace.ai_tags = record.map(|r| r.ai_tags.clone()).unwrap_or_default();
        if let Some(status) = self.workspace.image_counter_status() {
            self.workspace.status = status;
        }

        let mut tasks = vec![self.load_bitmap(&id)];
        if self.vision_enabled {
            if let Some(request) = self.pipeline.try_start_vision(id, &mut self.workspace) {
                tasks.push(self.dispatch_vision(request));
            }
        }
        self.start_listening();

        Task::batch(tasks)
    }

    fn load_bitmap(&self, id: &ImageId) -> Task<Message> {
        let angle = self.rotations.get(id).copied().unwrap_or(0);
        Task::perform(load_image(id.clone(), angle), |(id, result)| {
            Message::ImageLoaded(id, result)
        })
    }

    fn step(&mut self, delta: i32) -> Task<Message> {
        let Some(current) = self.workspace.current else {
            return Task::none();
        };
        let target = current as i32 + delta;
        if target < 0 || target as usize >= self.workspace.images.len() {
            return Task::none();
        }
        self.workspace.current = Some(target as usize);
        self.load_current()
    }

    fn advance_next(&mut self) -> Task<Message> {
        self.step(1)
    }

    fn rotate_current(&mut self) -> Task<Message> {
        let Some(id) = self.workspace.active_image() else {
            return Task::none();
        };
        let angle = self.rotations.entry(id.clone()).or_insert(0);
        *angle = (*angle + 90) % 360;
        tracing::info!(image = %id.file_name(), angle = *angle, "Rotating image");
        self.load_bitmap(&id)
    }

    fn record_decision(&mut self, action: Decision) -> Task<Message> {
        self.pipeline.record_decision(action, &mut self.workspace);
        // Whatever listen intent was pending for this image is withdrawn
        self.audio.cancel_listen();
        self.listening = false;
        if self.workspace.take_navigate() {
            self.advance_next()
        } else {
            Task::none()
        }
    }

    fn start_listening(&mut self) {
        if self.workspace.current.is_some() && self.audio.request_listen() {
            self.listening = true;
        }
    }

    fn on_audio_event(&mut self, event: Option<AudioEvent>) -> Task<Message> {
        let Some(event) = event else {
            tracing::error!("Audio event channel closed");
            return Task::none();
        };

        let task = match event {
            AudioEvent::Listening => {
                self.listening = true;
                self.workspace.status = "Listening...".to_string();
                Task::none()
            }
            AudioEvent::Transcribing => {
                self.listening = false;
                self.workspace.status = "Transcribing...".to_string();
                Task::none()
            }
            AudioEvent::Failed(e) => {
                self.listening = false;
                self.workspace.status = e.to_string();
                Task::none()
            }
            AudioEvent::Transcript(text) => {
                self.listening = false;
                self.handle_transcription(text)
            }
        };

        // Re-arm the pump so the next worker event reaches us
        let pump = Task::perform(
            next_audio_event(Arc::clone(&self.audio_events)),
            Message::Audio,
        );
        Task::batch([task, pump])
    }

    /// Dictated text arrived: clean it through the AI pipeline when
    /// enabled, otherwise append it to the manual tags untouched.
    fn handle_transcription(&mut self, text: String) -> Task<Message> {
        tracing::info!(text = %text, "Handling transcription");
        if let Some(status) = self.workspace.image_counter_status() {
            self.workspace.status = status;
        }
        if text.is_empty() {
            return Task::none();
        }

        if self.ai_enabled {
            match self.pipeline.try_start_dictation(&text, &mut self.workspace) {
                Some(request) => self.dispatch_text(request),
                None => Task::none(),
            }
        } else {
            let manual = Surface::manual_tags(&self.workspace);
            self.workspace.manual_tags = append_tag_text(&manual, &text);
            Task::none()
        }
    }

    fn dispatch_vision(&self, request: VisionRequest) -> Task<Message> {
        let client = Arc::clone(&self.client);
        Task::perform(
            async move {
                let result = client.describe_image(request.subject.path()).await;
                VisionOutcome {
                    subject: request.subject,
                    result,
                }
            },
            Message::VisionDone,
        )
    }

    fn dispatch_text(&self, request: TextRequest) -> Task<Message> {
        let client = Arc::clone(&self.client);
        Task::perform(
            async move {
                let result = client.generate_text(&request.prompt).await;
                TextOutcome {
                    subject: request.subject,
                    result,
                    advance: request.advance,
                }
            },
            Message::TextDone,
        )
    }

    fn commit_changes(&mut self) -> Task<Message> {
        let Some(folder) = self.folder.clone() else {
            return Task::none();
        };

        tracing::info!("Commit changes initiated");
        match files::commit_session(
            &folder,
            self.pipeline.ledger(),
            &self.rotations,
            &self.config.dirs,
        ) {
            Ok(summary) => {
                tracing::info!(kept = summary.kept, deleted = summary.deleted, "Commit finished");
                for issue in &summary.issues {
                    tracing::warn!("{issue}");
                }
                self.reset_session();
                self.workspace.status = format!(
                    "{} Select a folder to begin a new session.",
                    summary.status_line()
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Commit failed");
                self.workspace.status = e.to_string();
            }
        }
        Task::none()
    }

    fn reset_session(&mut self) {
        self.folder = None;
        self.pipeline.reset_session();
        self.rotations.clear();
        self.displayed = None;
        self.workspace.images.clear();
        self.workspace.current = None;
        self.workspace.manual_tags.clear();
        self.workspace.ai_tags.clear();
    }

    fn view(&self) -> Element<Message> {
        let mut commit = button("Commit Changes").padding(8);
        if self.folder.is_some() {
            commit = commit.on_press(Message::CommitChanges);
        }

        let top_bar = row![
            button("Select Folder").on_press(Message::SelectFolder).padding(8),
            checkbox("AI Tag Processing", self.ai_enabled).on_toggle(Message::AiToggled),
            checkbox("Vision Analysis", self.vision_enabled).on_toggle(Message::VisionToggled),
            horizontal_space(),
            commit,
        ]
        .spacing(16)
        .align_y(Alignment::Center);

        let viewer: Element<Message> = match &self.displayed {
            Some((_, handle)) => iced::widget::image(handle.clone())
                .width(Length::Fill)
                .height(Length::Fill)
                .into(),
            None => container(
                text(if self.workspace.images.is_empty() {
                    "Select a folder to begin."
                } else {
                    "Loading..."
                })
                .size(20),
            )
            .width(Length::Fill)
            .height(Length::Fill)
            .center_x(Length::Fill)
            .center_y(Length::Fill)
            .into(),
        };

        let image_area = row![
            button(text("◀").size(24)).on_press(Message::PrevImage),
            column![
                viewer,
                container(button("↻ Rotate").on_press(Message::RotateImage)).center_x(Length::Fill),
            ]
            .spacing(6)
            .width(Length::Fill)
            .height(Length::Fill),
            button(text("▶").size(24)).on_press(Message::NextImage),
        ]
        .spacing(8)
        .align_y(Alignment::Center)
        .height(Length::Fill);

        let tag_row = row![
            text("Tags:"),
            text_input("Speak or type tags...", &self.workspace.manual_tags)
                .on_input(Message::ManualTagsChanged)
                .width(Length::Fill),
            button(if self.listening { "🎤 Listening" } else { "🎤" })
                .on_press(Message::RecordPressed),
        ]
        .spacing(8)
        .align_y(Alignment::Center);

        let mut pills = Row::new().spacing(6);
        for (index, tag) in self.workspace.ai_tags.iter().enumerate() {
            pills = pills.push(
                button(text(format!("{tag} ×")).size(13))
                    .padding([2.0, 8.0])
                    .on_press(Message::RemoveAiTag(index)),
            );
        }
        let ai_section = column![text("AI Generated Tags:").size(13), pills].spacing(4);

        let decision_row = row![
            button(text("Delete").size(18))
                .style(button::danger)
                .padding(12)
                .on_press(Message::DeleteImage),
            horizontal_space(),
            button(text("Keep").size(18))
                .style(button::success)
                .padding(12)
                .on_press(Message::KeepImage),
        ];

        let content = column![
            top_bar,
            image_area,
            tag_row,
            ai_section,
            decision_row,
            text(&self.workspace.status).size(14),
        ]
        .spacing(12)
        .padding(16);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

/// Wait for the next event from the dictation worker.
async fn next_audio_event(
    events: Arc<AsyncMutex<UnboundedReceiver<AudioEvent>>>,
) -> Option<AudioEvent> {
    events.lock().await.recv().await
}

/// Decode an image and apply its pending rotation off the control thread.
async fn load_image(id: ImageId, angle: u32) -> (ImageId, Result<ImageHandle, String>) {
    let path = id.path().to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let img = image::open(&path).map_err(|e| format!("Could not load image: {e}"))?;
        let img = files::apply_rotation(img, angle);
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(ImageHandle::from_rgba(width, height, rgba.into_raw()))
    })
    .await
    .map_err(|e| format!("Task join error: {e}"))
    .and_then(|r| r);

    (id, result)
}

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::info!("Photo triage starting");

    iced::application("Photo Triage", PhotoTriage::update, PhotoTriage::view)
        .theme(PhotoTriage::theme)
        .centered()
        .run_with(PhotoTriage::new)
}
