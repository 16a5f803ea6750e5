// Row types shared with the managed backend.
// Field names follow the backend's snake_case columns so rows decode without renames.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// Backend table names
pub mod tables {
    pub const PROFILES: &str = "profiles";
    pub const HOTELS: &str = "hotels";
    pub const APARTMENTS: &str = "apartments";
    pub const RESTAURANTS: &str = "restaurants";
    pub const BOOKINGS: &str = "bookings";
    pub const REVIEWS: &str = "reviews";
    pub const CONVERSATIONS: &str = "conversations";
    pub const MESSAGES: &str = "messages";
    pub const WISHLISTS: &str = "wishlists";
    pub const WISHLIST_ITEMS: &str = "wishlist_items";
    pub const PROPERTY_AVAILABILITY: &str = "property_availability";
    pub const BLOCKED_DATES: &str = "blocked_dates";
}

// The three kinds of listing, each stored in its own table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Hotel,
    Apartment,
    Restaurant,
}

impl ListingType {
    pub const ALL: [ListingType; 3] = [
        ListingType::Hotel,
        ListingType::Apartment,
        ListingType::Restaurant,
    ];

    pub fn table(self) -> &'static str {
        match self {
            ListingType::Hotel => tables::HOTELS,
            ListingType::Apartment => tables::APARTMENTS,
            ListingType::Restaurant => tables::RESTAURANTS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListingType::Hotel => "hotel",
            ListingType::Apartment => "apartment",
            ListingType::Restaurant => "restaurant",
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hotel" => Ok(ListingType::Hotel),
            "apartment" => Ok(ListingType::Apartment),
            "restaurant" => Ok(ListingType::Restaurant),
            other => Err(format!("unknown listing type: {other}")),
        }
    }
}

// The slice of a listing the booking flow needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    #[serde(default)]
    pub location: String,
    pub price_per_night: f64,
    #[serde(default)]
    pub minimum_stay: Option<u32>,
    #[serde(default)]
    pub max_guests: Option<u32>,
    #[serde(default)]
    pub host_id: Option<String>,
}

// A listing row as stored. Listing tables carry no type column; the table
// the row was read from supplies it.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub price_per_night: f64,
    #[serde(default)]
    pub minimum_stay: Option<u32>,
    #[serde(default)]
    pub max_guests: Option<u32>,
    #[serde(default)]
    pub host_id: Option<String>,
}

impl ListingRecord {
    pub fn into_listing(self, listing_type: ListingType) -> Listing {
        Listing {
            id: self.id,
            name: self.name,
            listing_type,
            location: self.location,
            price_per_night: self.price_per_night,
            minimum_stay: self.minimum_stay,
            max_guests: self.max_guests,
            host_id: self.host_id,
        }
    }
}

// Listing fields a host fills in; `host_id` is set from the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    pub price_per_night: f64,
    #[serde(default)]
    pub images: Vec<String>,
    // Table-specific columns (bedrooms, max_guests, cuisine_type, amenities, ...)
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    // Host-side workflow: pending bookings are confirmed or cancelled,
    // confirmed bookings are marked complete. Nothing else moves.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub property_id: String,
    pub guest_id: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_price: f64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub property_id: String,
    pub guest_id: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub total_price: f64,
    pub status: BookingStatus,
}

// One row of the per-day override table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityOverride {
    pub property_id: String,
    pub property_type: ListingType,
    pub date: NaiveDate,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Maintenance,
    PersonalUse,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub id: String,
    pub property_id: String,
    pub property_type: ListingType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: BlockReason,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub property_id: String,
    pub reviewer_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    // Version stamp used to order competing writes of the same message
    pub fn revision(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub property_id: String,
    pub guest_id: String,
    pub host_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub id: String,
    pub wishlist_id: String,
    pub property_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wishlist {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<WishlistItem>,
}

// Timestamps are rendered the same way everywhere so string comparisons stay ordered
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}
