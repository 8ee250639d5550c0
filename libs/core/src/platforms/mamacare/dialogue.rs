//! Keyword-driven maternal health dialogue.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::session::ChatSessions;

/// In-process chatbot that answers a sender's text.
#[async_trait]
pub trait Dialogue: Send + Sync {
    async fn is_active(&self, sender: &str) -> bool;
    async fn activate(&self, sender: &str);
    async fn deactivate(&self, sender: &str);
    async fn process(&self, sender: &str, text: &str) -> String;
}

/// Keywords that start a session. `SEVBTFRI` is `HEALTH` in base64, as sent
/// by some click-to-chat links.
pub fn is_activation_keyword(text: &str) -> bool {
    matches!(text.trim().to_ascii_uppercase().as_str(), "HEALTH" | "SEVBTFRI")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Swahili,
}

#[derive(Debug, Clone, Default)]
struct Profile {
    language: Language,
    week: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Start,
    Exit,
    ChooseLanguage,
    SetLanguage(Language),
    Week(Option<u8>),
    Emergency,
    Other,
}

fn parse_command(text: &str) -> Command {
    let upper = text.trim().to_ascii_uppercase();
    if is_activation_keyword(&upper) {
        return Command::Start;
    }
    match upper.as_str() {
        "EXIT" | "STOP" => return Command::Exit,
        "LANGUAGE" | "LUGHA" => return Command::ChooseLanguage,
        "EN" | "ENGLISH" => return Command::SetLanguage(Language::English),
        "SW" | "KISWAHILI" | "SWAHILI" => return Command::SetLanguage(Language::Swahili),
        "EMERGENCY" | "DHARURA" => return Command::Emergency,
        _ => {}
    }
    let week_argument = upper
        .strip_prefix("WEEK")
        .or_else(|| upper.strip_prefix("WIKI"))
        .filter(|rest| rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c.is_ascii_digit()));
    match week_argument {
        Some(rest) => Command::Week(
            rest.trim()
                .parse::<u8>()
                .ok()
                .filter(|week| (1..=42).contains(week)),
        ),
        None => Command::Other,
    }
}

fn welcome(language: Language) -> &'static str {
    match language {
        Language::English => {
            "Welcome to MamaCare! I can share weekly pregnancy tips and danger signs to watch for.\n\
             Send WEEK <number> (e.g. WEEK 20) for your pregnancy week, LANGUAGE to switch \
             between English and Kiswahili, EMERGENCY for danger signs, or EXIT to stop."
        }
        Language::Swahili => {
            "Karibu MamaCare! Nitakutumia ushauri wa kila wiki ya ujauzito na dalili za hatari.\n\
             Tuma WIKI <namba> (mfano WIKI 20), LUGHA kubadilisha lugha, DHARURA kwa dalili za \
             hatari, au EXIT kusitisha."
        }
    }
}

fn goodbye(language: Language) -> &'static str {
    match language {
        Language::English => "Thank you for using MamaCare. Send HEALTH any time to start again.",
        Language::Swahili => "Asante kwa kutumia MamaCare. Tuma HEALTH wakati wowote kuanza tena.",
    }
}

fn emergency(language: Language) -> &'static str {
    match language {
        Language::English => {
            "Go to the nearest health facility immediately if you have heavy bleeding, severe \
             headache or blurred vision, fever, severe abdominal pain, swelling of the face or \
             hands, fits, or your baby has stopped moving."
        }
        Language::Swahili => {
            "Nenda kituo cha afya kilicho karibu mara moja ukiona damu nyingi, maumivu makali ya \
             kichwa au kuona ukungu, homa, maumivu makali ya tumbo, kuvimba uso au mikono, \
             degedege, au mtoto ameacha kucheza tumboni."
        }
    }
}

fn week_update(language: Language, week: u8) -> String {
    let (trimester, tip_en, tip_sw) = match week {
        1..=12 => (
            1,
            "Take folic acid daily, eat small frequent meals and book your first antenatal visit.",
            "Meza folic acid kila siku, kula milo midogo mara kwa mara na anza kliniki ya wajawazito.",
        ),
        13..=27 => (
            2,
            "Attend your antenatal visits, sleep under a treated net and eat iron-rich foods.",
            "Hudhuria kliniki, lala ndani ya chandarua chenye dawa na kula vyakula vyenye madini ya chuma.",
        ),
        _ => (
            3,
            "Prepare your birth plan, count your baby's movements daily and know your nearest facility.",
            "Andaa mpango wa kujifungua, hesabu mateke ya mtoto kila siku na jua kituo cha afya kilicho karibu.",
        ),
    };
    match language {
        Language::English => format!("Week {week} (trimester {trimester}): {tip_en}"),
        Language::Swahili => format!("Wiki ya {week} (kipindi cha {trimester}): {tip_sw}"),
    }
}

pub struct MaternalHealthDialogue {
    sessions: Arc<ChatSessions>,
    profiles: DashMap<String, Profile>,
}

impl MaternalHealthDialogue {
    pub fn new(sessions: Arc<ChatSessions>) -> Self {
        Self {
            sessions,
            profiles: DashMap::new(),
        }
    }

    fn profile(&self, sender: &str) -> Profile {
        self.profiles
            .get(sender)
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Dialogue for MaternalHealthDialogue {
    async fn is_active(&self, sender: &str) -> bool {
        self.sessions.is_active(sender).await
    }

    async fn activate(&self, sender: &str) {
        self.sessions.activate(sender).await
    }

    async fn deactivate(&self, sender: &str) {
        self.sessions.deactivate(sender).await;
        self.profiles.remove(sender);
    }

    async fn process(&self, sender: &str, text: &str) -> String {
        let profile = self.profile(sender);
        let language = profile.language;
        match parse_command(text) {
            Command::Start => welcome(language).to_string(),
            Command::Exit => {
                self.deactivate(sender).await;
                goodbye(language).to_string()
            }
            Command::ChooseLanguage => {
                "Reply EN for English or SW for Kiswahili. / Jibu EN kwa Kiingereza au SW kwa Kiswahili."
                    .to_string()
            }
            Command::SetLanguage(chosen) => {
                self.profiles.entry(sender.to_string()).or_default().language = chosen;
                match chosen {
                    Language::English => "Language set to English.".to_string(),
                    Language::Swahili => "Lugha imewekwa kuwa Kiswahili.".to_string(),
                }
            }
            Command::Week(Some(week)) => {
                self.profiles.entry(sender.to_string()).or_default().week = Some(week);
                week_update(language, week)
            }
            Command::Week(None) => match language {
                Language::English => {
                    "Please send WEEK followed by a number from 1 to 42, e.g. WEEK 20.".to_string()
                }
                Language::Swahili => {
                    "Tafadhali tuma WIKI ikifuatiwa na namba kati ya 1 na 42, mfano WIKI 20."
                        .to_string()
                }
            },
            Command::Emergency => emergency(language).to_string(),
            Command::Other => match (language, profile.week) {
                (Language::English, Some(week)) => format!(
                    "You are in week {week}. Send WEEK <number> for an update, EMERGENCY for danger signs, or EXIT to stop."
                ),
                (Language::English, None) => {
                    "I did not understand that. Send WEEK <number>, LANGUAGE, EMERGENCY or EXIT."
                        .to_string()
                }
                (Language::Swahili, _) => {
                    "Sijaelewa. Tuma WIKI <namba>, LUGHA, DHARURA au EXIT.".to_string()
                }
            },
        }
    }
}
