//! Configuration and settings for Token Tracker.

mod settings;

pub use settings::{
    get_db_path,
    mask_secret,
    Settings,
    ALERT_DAILY_USD,
    ALERT_MONTHLY_USD,
    ANTHROPIC_KEY,
    DEFAULT_WINDOW_DAYS,
    EVENT_BUS_CAPACITY,
    OPENAI_KEY,
    REFRESH_GRACE,
};
