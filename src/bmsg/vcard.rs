// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! vCard entries embedded in a bMessage.

use super::FormatVersion;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VcardVersion {
    #[default]
    V2_1,
    V3_0,
}

impl VcardVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            VcardVersion::V2_1 => "2.1",
            VcardVersion::V3_0 => "3.0",
        }
    }

    /// Anything other than exactly "3.0" reads as 2.1.
    pub fn parse(s: &str) -> Self {
        if s.trim() == "3.0" {
            VcardVersion::V3_0
        } else {
            VcardVersion::V2_1
        }
    }
}

/// An originator or recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vcard {
    pub version: VcardVersion,
    pub name: String,
    pub formatted_name: String,
    pub phone_numbers: Vec<String>,
    pub emails: Vec<String>,
    pub bt_uids: Vec<String>,
    pub bt_ucis: Vec<String>,
    /// Envelope nesting depth, 0 for the outermost BENV.
    pub env_level: usize,
}

impl Vcard {
    /// Create a 2.1 vCard with a name and phone number.
    pub fn with_phone(name: &str, phone: &str) -> Self {
        Self {
            name: name.to_string(),
            phone_numbers: vec![phone.to_string()],
            ..Self::default()
        }
    }

    /// Create a 2.1 vCard with a name and e-mail address.
    pub fn with_email(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            emails: vec![email.to_string()],
            ..Self::default()
        }
    }

    pub fn at_level(mut self, level: usize) -> Self {
        self.env_level = level;
        self
    }

    /// First phone number, else first e-mail address.
    pub fn primary_address(&self) -> Option<&str> {
        self.phone_numbers
            .first()
            .or_else(|| self.emails.first())
            .map(String::as_str)
    }

    /// Apply one `NAME[;params]:value` line.
    pub(crate) fn apply_line(&mut self, line: &str, format: FormatVersion) {
        let Some((key, value)) = line.split_once(':') else {
            return;
        };
        let property = key.split(';').next().unwrap_or("").trim().to_ascii_uppercase();
        let split = |v: &str| -> Vec<String> {
            v.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };
        match property.as_str() {
            "VERSION" => self.version = VcardVersion::parse(value),
            "N" => self.name = value.to_string(),
            "FN" => self.formatted_name = value.to_string(),
            "TEL" => self.phone_numbers.extend(split(value)),
            "EMAIL" => self.emails.extend(split(value)),
            "X-BT-UID" if format == FormatVersion::V1_1 => self.bt_uids.push(value.to_string()),
            "X-BT-UCI" if format == FormatVersion::V1_1 => self.bt_ucis.push(value.to_string()),
            _ => {}
        }
    }

    pub(crate) fn write(&self, out: &mut String, format: FormatVersion) {
        let mut line = |s: &str| {
            out.push_str(s);
            out.push_str("\r\n");
        };
        line("BEGIN:VCARD");
        line(&format!("VERSION:{}", self.version.as_str()));
        line(&format!("N:{}", self.name));
        if !self.formatted_name.is_empty() || self.version == VcardVersion::V3_0 {
            line(&format!("FN:{}", self.formatted_name));
        }
        for tel in &self.phone_numbers {
            line(&format!("TEL:{}", tel));
        }
        for email in &self.emails {
            line(&format!("EMAIL:{}", email));
        }
        if format == FormatVersion::V1_1 {
            for uid in &self.bt_uids {
                line(&format!("X-BT-UID:{}", uid));
            }
            for uci in &self.bt_ucis {
                line(&format!("X-BT-UCI:{}", uci));
            }
        }
        line("END:VCARD");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_lines() {
        let mut card = Vcard::default();
        for l in [
            "VERSION:3.0",
            "N:Doe;John",
            "FN:John Doe",
            "TEL;TYPE=CELL:+15550100;+15550101",
            "EMAIL:john@example.com",
            "X-BT-UCI:im:john",
        ] {
            card.apply_line(l, FormatVersion::V1_0);
        }
        assert_eq!(card.version, VcardVersion::V3_0);
        assert_eq!(card.name, "Doe;John");
        assert_eq!(card.phone_numbers, vec!["+15550100", "+15550101"]);
        assert_eq!(card.emails, vec!["john@example.com"]);
        // Bluetooth ids only exist in the 1.1 message format.
        assert!(card.bt_ucis.is_empty());

        card.apply_line("X-BT-UCI:im:john", FormatVersion::V1_1);
        assert_eq!(card.bt_ucis, vec!["im:john"]);
    }

    #[test]
    fn test_unknown_version_defaults() {
        assert_eq!(VcardVersion::parse("4.0"), VcardVersion::V2_1);
        assert_eq!(VcardVersion::parse("3.0"), VcardVersion::V3_0);
    }

    #[test]
    fn test_primary_address() {
        assert_eq!(Vcard::with_phone("A", "123").primary_address(), Some("123"));
        assert_eq!(Vcard::with_email("B", "b@x").primary_address(), Some("b@x"));
        assert_eq!(Vcard::default().primary_address(), None);
    }
}
