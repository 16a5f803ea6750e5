// Client core for the stay & dining marketplace

// Shared rows, queries and the backend boundary
pub mod backend;
pub mod config;
pub mod memory;
pub mod model;
pub mod query;
pub mod rest;
pub mod session;

// Calendar selection and pricing
pub mod availability;
pub mod calendar;
pub mod pricing;

// Guest and host features
pub mod analytics;
pub mod booking;
pub mod host;
pub mod messaging;
pub mod review;
pub mod search;
pub mod wishlist;

// Re-export key types for convenience
pub use analytics::{AnalyticsReport, AnalyticsService, TimeRange};
pub use availability::{calendar_window, CalendarLoader, FeedUpdate};
pub use backend::{ApiError, Backend, ClientError, MessageEvent, MessageStream};
pub use booking::{BookingConfirmation, BookingError, BookingRequest, BookingService, BookingWidget};
pub use calendar::{
    classify_day, AvailabilityFeed, ClickOutcome, DateSelection, DayAvailability, DayStatus,
    IgnoreReason, SelectionEngine,
};
pub use config::ClientConfig;
pub use host::HostService;
pub use memory::InMemoryBackend;
pub use messaging::{ApplyOutcome, MessageStore, MessagingService};
pub use model::{
    BlockReason, BlockedRange, Booking, BookingStatus, Conversation, Listing, ListingRecord,
    ListingSummary, ListingType, Message, NewListing, Profile, Review, Wishlist, WishlistItem,
};
pub use pricing::{nights, PriceQuote};
pub use query::{Filter, Query};
pub use rest::RestBackend;
pub use review::{ReviewService, ReviewSort};
pub use search::{SearchComposer, SearchFilters, SearchResult, SortOrder};
pub use session::{AuthUser, ServiceError, Session};
pub use wishlist::WishlistService;
