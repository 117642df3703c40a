use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use veranda_core::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub room_type: String,
    pub price_per_night: Decimal,
    pub is_available: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub hotel_name: String,
    pub room_id: i64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub total_price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingPreview {
    pub room_type: String,
    pub total_price: Decimal,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub is_available: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewBooking {
    pub user_id: String,
    pub hotel_id: i64,
    pub room_id: i64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreviewRequest {
    pub room_id: i64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

/// REST collaborator for the hotel inventory service. The core reads only a
/// handful of named fields; everything else about the inventory data model
/// stays on the other side of this seam.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn list_hotels(&self, token: &str) -> Result<Vec<Hotel>, DomainError>;
    async fn hotel(&self, token: &str, hotel_id: i64) -> Result<Hotel, DomainError>;
    async fn room(&self, token: &str, room_id: i64) -> Result<Room, DomainError>;
    async fn booking(&self, token: &str, booking_id: i64) -> Result<Booking, DomainError>;
    async fn create_booking(
        &self,
        token: &str,
        request: &NewBooking,
    ) -> Result<Booking, DomainError>;
    async fn preview(
        &self,
        token: &str,
        request: &PreviewRequest,
    ) -> Result<BookingPreview, DomainError>;
}

pub struct HttpInventoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpInventoryClient {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        Ok(Self { http, base_url })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<T, DomainError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        if !response.status().is_success() {
            return Err(DomainError::Provider(format!(
                "inventory request `{path}` failed with status {}",
                response.status()
            )));
        }
        response.json().await.map_err(|error| DomainError::Provider(error.to_string()))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> Result<T, DomainError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|error| DomainError::Provider(error.to_string()))?;
        if !response.status().is_success() {
            return Err(DomainError::Provider(format!(
                "inventory request `{path}` failed with status {}",
                response.status()
            )));
        }
        response.json().await.map_err(|error| DomainError::Provider(error.to_string()))
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn list_hotels(&self, token: &str) -> Result<Vec<Hotel>, DomainError> {
        self.get_json(token, "/hotels").await
    }

    async fn hotel(&self, token: &str, hotel_id: i64) -> Result<Hotel, DomainError> {
        self.get_json(token, &format!("/hotels/{hotel_id}")).await
    }

    async fn room(&self, token: &str, room_id: i64) -> Result<Room, DomainError> {
        self.get_json(token, &format!("/rooms/{room_id}")).await
    }

    async fn booking(&self, token: &str, booking_id: i64) -> Result<Booking, DomainError> {
        self.get_json(token, &format!("/bookings/{booking_id}")).await
    }

    async fn create_booking(
        &self,
        token: &str,
        request: &NewBooking,
    ) -> Result<Booking, DomainError> {
        self.post_json(token, "/bookings", request).await
    }

    async fn preview(
        &self,
        token: &str,
        request: &PreviewRequest,
    ) -> Result<BookingPreview, DomainError> {
        self.post_json(token, "/bookings/preview", request).await
    }
}

/// Deterministic in-memory inventory for tests. Previews price the stay as
/// nights times the room's nightly rate.
#[derive(Default)]
pub struct InMemoryInventoryClient {
    hotels: Vec<Hotel>,
    rooms: HashMap<i64, Room>,
    bookings: Mutex<HashMap<i64, Booking>>,
    next_booking_id: Mutex<i64>,
    fail_booking_creation: bool,
}

impl InMemoryInventoryClient {
    pub fn with_rooms(hotels: Vec<Hotel>, rooms: Vec<Room>) -> Self {
        Self {
            hotels,
            rooms: rooms.into_iter().map(|room| (room.id, room)).collect(),
            bookings: Mutex::new(HashMap::new()),
            next_booking_id: Mutex::new(1),
            fail_booking_creation: false,
        }
    }

    pub fn failing_booking_creation(mut self) -> Self {
        self.fail_booking_creation = true;
        self
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.bookings.lock().await.insert(booking.id, booking);
    }

    fn priced_preview(
        &self,
        request: &PreviewRequest,
    ) -> Result<BookingPreview, DomainError> {
        let room = self
            .rooms
            .get(&request.room_id)
            .ok_or_else(|| DomainError::Provider(format!("no room {}", request.room_id)))?;
        let nights = (request.check_out - request.check_in).num_days().max(1);
        Ok(BookingPreview {
            room_type: room.room_type.clone(),
            total_price: room.price_per_night * Decimal::from(nights),
            check_in: request.check_in,
            check_out: request.check_out,
            is_available: room.is_available,
        })
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn list_hotels(&self, _token: &str) -> Result<Vec<Hotel>, DomainError> {
        Ok(self.hotels.clone())
    }

    async fn hotel(&self, _token: &str, hotel_id: i64) -> Result<Hotel, DomainError> {
        self.hotels
            .iter()
            .find(|hotel| hotel.id == hotel_id)
            .cloned()
            .ok_or_else(|| DomainError::Provider(format!("no hotel {hotel_id}")))
    }

    async fn room(&self, _token: &str, room_id: i64) -> Result<Room, DomainError> {
        self.rooms
            .get(&room_id)
            .cloned()
            .ok_or_else(|| DomainError::Provider(format!("no room {room_id}")))
    }

    async fn booking(&self, _token: &str, booking_id: i64) -> Result<Booking, DomainError> {
        self.bookings
            .lock()
            .await
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| DomainError::Provider(format!("no booking {booking_id}")))
    }

    async fn create_booking(
        &self,
        _token: &str,
        request: &NewBooking,
    ) -> Result<Booking, DomainError> {
        if self.fail_booking_creation {
            return Err(DomainError::Provider("booking rejected by inventory".to_string()));
        }
        let preview = self.priced_preview(&PreviewRequest {
            room_id: request.room_id,
            check_in: request.check_in,
            check_out: request.check_out,
        })?;
        let hotel = self.hotel(_token, request.hotel_id).await?;

        let mut next_id = self.next_booking_id.lock().await;
        let booking = Booking {
            id: *next_id,
            hotel_name: hotel.name,
            room_id: request.room_id,
            check_in: request.check_in,
            check_out: request.check_out,
            total_price: preview.total_price,
        };
        *next_id += 1;
        self.bookings.lock().await.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn preview(
        &self,
        _token: &str,
        request: &PreviewRequest,
    ) -> Result<BookingPreview, DomainError> {
        self.priced_preview(request)
    }
}
