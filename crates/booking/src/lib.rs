pub mod calendar;
pub mod inventory;
pub mod notify;
pub mod ops;
pub mod upgrade;

pub use calendar::{CalendarClient, CalendarEvent, HttpCalendarClient, InMemoryCalendarClient};
pub use inventory::{
    Booking, BookingPreview, Hotel, HttpInventoryClient, InMemoryInventoryClient,
    InventoryClient, NewBooking, PreviewRequest, Room,
};
pub use notify::{LoggingNotifier, Notifier, RecordingNotifier};
pub use ops::{BookingOps, ToolOutput};
pub use upgrade::{Delay, InstantDelay, TokioDelay, UpgradeCoordinator, UpgradeOutcome};
