//! Chromatic keys and semitone math

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SequencerError;

/// One of the 12 chromatic pitch classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Key {
    #[default]
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl Key {
    /// All keys in chromatic order starting at C
    pub const ALL: [Key; 12] = [
        Key::C,
        Key::CSharp,
        Key::D,
        Key::DSharp,
        Key::E,
        Key::F,
        Key::FSharp,
        Key::G,
        Key::GSharp,
        Key::A,
        Key::ASharp,
        Key::B,
    ];

    /// Position of this key in the chromatic scale (C = 0)
    pub fn index(self) -> usize {
        self as usize
    }

    /// Key at a chromatic position, wrapping around the octave
    pub fn from_index(index: i64) -> Key {
        Key::ALL[index.rem_euclid(12) as usize]
    }

    /// Display name using sharps
    pub fn name(self) -> &'static str {
        match self {
            Key::C => "C",
            Key::CSharp => "C#",
            Key::D => "D",
            Key::DSharp => "D#",
            Key::E => "E",
            Key::F => "F",
            Key::FSharp => "F#",
            Key::G => "G",
            Key::GSharp => "G#",
            Key::A => "A",
            Key::ASharp => "A#",
            Key::B => "B",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Key {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s.trim() {
            "C" | "B#" => Key::C,
            "C#" | "Db" => Key::CSharp,
            "D" => Key::D,
            "D#" | "Eb" => Key::DSharp,
            "E" | "Fb" => Key::E,
            "F" | "E#" => Key::F,
            "F#" | "Gb" => Key::FSharp,
            "G" => Key::G,
            "G#" | "Ab" => Key::GSharp,
            "A" => Key::A,
            "A#" | "Bb" => Key::ASharp,
            "B" | "Cb" => Key::B,
            other => {
                return Err(SequencerError::invalid("key", other, "a chromatic key such as C, F# or Bb"))
            }
        };
        Ok(key)
    }
}

impl TryFrom<String> for Key {
    type Error = SequencerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.name().to_string()
    }
}

/// Rotate a key by a number of semitones, wrapping around the octave
///
/// # Example
/// ```
/// use stepgrid::mapper::{transpose, Key};
/// assert_eq!(transpose(Key::C, 3), Key::DSharp);
/// assert_eq!(transpose(Key::C, -3), Key::A);
/// ```
pub fn transpose(key: Key, semitones: i32) -> Key {
    Key::from_index(key.index() as i64 + semitones as i64)
}

/// Frequency ratio for a semitone offset (`2^(s/12)`)
#[inline]
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}

const INTERVAL_NAMES: [&str; 13] = [
    "Unison",
    "Minor 2nd",
    "Major 2nd",
    "Minor 3rd",
    "Major 3rd",
    "Perfect 4th",
    "Tritone",
    "Perfect 5th",
    "Minor 6th",
    "Major 6th",
    "Minor 7th",
    "Major 7th",
    "Octave",
];

/// Human-readable interval for a semitone offset, e.g. "Minor 3rd up"
///
/// Display only; nothing in the audio path reads this. Offsets beyond an
/// octave saturate at "Octave".
pub fn interval_name(semitones: i32) -> String {
    let name = INTERVAL_NAMES[semitones.unsigned_abs().min(12) as usize];
    match semitones.signum() {
        0 => name.to_string(),
        1 => format!("{} up", name),
        _ => format!("{} down", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test_case(Key::C, 3, Key::DSharp ; "c up minor third")]
    #[test_case(Key::C, -3, Key::A ; "c down minor third")]
    #[test_case(Key::B, 1, Key::C ; "wraps upward")]
    #[test_case(Key::C, -1, Key::B ; "wraps downward")]
    #[test_case(Key::G, 12, Key::G ; "octave up")]
    #[test_case(Key::G, -12, Key::G ; "octave down")]
    fn test_transpose(key: Key, semitones: i32, expected: Key) {
        assert_eq!(transpose(key, semitones), expected);
    }

    #[test]
    fn test_transpose_round_trip_all_keys() {
        for key in Key::ALL {
            for s in -12..=12 {
                assert_eq!(transpose(transpose(key, s), -s), key, "key {} shift {}", key, s);
            }
        }
    }

    #[test]
    fn test_key_parse_and_display() {
        assert_eq!("D#".parse::<Key>().unwrap(), Key::DSharp);
        assert_eq!("Eb".parse::<Key>().unwrap(), Key::DSharp);
        assert_eq!(Key::ASharp.to_string(), "A#");
        assert!("H".parse::<Key>().is_err());
    }

    #[test]
    fn test_key_serde_as_string() {
        let json = serde_json::to_string(&Key::FSharp).unwrap();
        assert_eq!(json, "\"F#\"");
        let back: Key = serde_json::from_str("\"Bb\"").unwrap();
        assert_eq!(back, Key::ASharp);
    }

    #[test]
    fn test_semitone_ratio() {
        assert_relative_eq!(semitones_to_ratio(12.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(semitones_to_ratio(-12.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(semitones_to_ratio(0.0), 1.0);
    }

    #[test]
    fn test_interval_names() {
        assert_eq!(interval_name(0), "Unison");
        assert_eq!(interval_name(3), "Minor 3rd up");
        assert_eq!(interval_name(-7), "Perfect 5th down");
        assert_eq!(interval_name(12), "Octave up");
        assert_eq!(interval_name(-12), "Octave down");
    }
}
