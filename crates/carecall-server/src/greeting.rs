//! Fixed phrases spoken by the agent outside of generated replies.

use chrono::{NaiveTime, Timelike};

/// Spoken when the reply generator fails; the caller can simply try again.
pub const REPLY_FAILURE: &str =
    "I'm sorry, I had trouble with that. Could you please say it again?";

/// Spoken before hanging up when speech recognition is unavailable.
pub const TRANSCRIPTION_FAILURE: &str =
    "I'm sorry, we're having technical difficulties and can't take your call right now. \
     Please call back in a few minutes. Goodbye.";

/// Part of the day used to pick the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPeriod {
    Morning,
    Afternoon,
    Evening,
}

impl DayPeriod {
    /// Morning is [03:00, 12:00); evening starts at 19:30 and runs until 03:00.
    pub fn at(time: NaiveTime) -> Self {
        let hour = time.hour();
        if (3..12).contains(&hour) {
            Self::Morning
        } else if hour >= 20 || hour < 3 || (hour == 19 && time.minute() >= 30) {
            Self::Evening
        } else {
            Self::Afternoon
        }
    }

    pub fn salutation(self) -> &'static str {
        match self {
            Self::Morning => "Good morning",
            Self::Afternoon => "Good afternoon",
            Self::Evening => "Good evening",
        }
    }
}

/// Builds the opening line of a call.
pub fn greeting_for(time: NaiveTime, practice_name: &str) -> String {
    format!(
        "{}, thank you for calling {}. How can I help you today?",
        DayPeriod::at(time).salutation(),
        practice_name
    )
}

/// Greeting for the server's local time.
pub fn current_greeting(practice_name: &str) -> String {
    greeting_for(chrono::Local::now().time(), practice_name)
}
