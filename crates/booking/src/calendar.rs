use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use veranda_core::errors::DomainError;

const GOOGLE_CALENDAR_EVENTS_URL: &str =
    "https://www.googleapis.com/calendar/v3/calendars/primary/events";

/// All-day event covering a hotel stay. `end` is exclusive, per the calendar
/// API's date convention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub summary: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// External calendar collaborator. Callers supply the federated token they
/// hold for the calendar service; nothing here touches the token cache.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Create the event and return a link the user can open.
    async fn create_event(
        &self,
        token: &str,
        event: &CalendarEvent,
    ) -> Result<String, DomainError>;
}

#[derive(Serialize)]
struct RawEventDate<'a> {
    date: &'a NaiveDate,
}

#[derive(Serialize)]
struct RawEventBody<'a> {
    summary: &'a str,
    start: RawEventDate<'a>,
    end: RawEventDate<'a>,
}

#[derive(Deserialize)]
struct RawEventResponse {
    #[serde(rename = "htmlLink")]
    html_link: Option<String>,
}

pub struct HttpCalendarClient {
    http: reqwest::Client,
    events_url: String,
}

impl HttpCalendarClient {
    pub fn new() -> Result<Self, DomainError> {
        Self::with_events_url(GOOGLE_CALENDAR_EVENTS_URL.to_string())
    }

    pub fn with_events_url(events_url: String) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        Ok(Self { http, events_url })
    }
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn create_event(
        &self,
        token: &str,
        event: &CalendarEvent,
    ) -> Result<String, DomainError> {
        let body = RawEventBody {
            summary: &event.summary,
            start: RawEventDate { date: &event.start },
            end: RawEventDate { date: &event.end },
        };
        let response = self
            .http
            .post(&self.events_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        if !response.status().is_success() {
            return Err(DomainError::Provider(format!(
                "calendar event creation failed with status {}",
                response.status()
            )));
        }
        let raw: RawEventResponse = response
            .json()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        raw.html_link
            .ok_or_else(|| DomainError::Provider("event response missing htmlLink".to_string()))
    }
}

/// Test double that records created events in memory.
#[derive(Default)]
pub struct InMemoryCalendarClient {
    events: Mutex<Vec<CalendarEvent>>,
    fail: bool,
}

impl InMemoryCalendarClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub async fn created_events(&self) -> Vec<CalendarEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl CalendarClient for InMemoryCalendarClient {
    async fn create_event(
        &self,
        _token: &str,
        event: &CalendarEvent,
    ) -> Result<String, DomainError> {
        if self.fail {
            return Err(DomainError::Provider("calendar rejected the event".to_string()));
        }
        let mut events = self.events.lock().await;
        events.push(event.clone());
        Ok(format!("https://calendar.example.com/event/{}", events.len()))
    }
}
