//! String catalogs and locale selection
//!
//! Catalogs are embedded at build time. [`I18n`] is a cheap, cloneable handle;
//! every clone sees the same locale. Until [`I18n::initialize`] has run,
//! [`I18n::translate`] returns the raw key, and callers that need translated
//! text can await [`I18n::ready`] instead of polling.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Writing direction of a locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDirection {
    Ltr,
    Rtl,
}

/// A supported locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleInfo {
    pub code: &'static str,
    /// Native name
    pub label: &'static str,
    pub dir: TextDirection,
    matchers: &'static [&'static str],
    catalog: &'static str,
}

pub const DEFAULT_LOCALE: &str = "en";

pub static SUPPORTED_LOCALES: &[LocaleInfo] = &[
    LocaleInfo {
        code: "en",
        label: "English",
        dir: TextDirection::Ltr,
        matchers: &["en", "en-us", "en-gb"],
        catalog: include_str!("../locales/en.json"),
    },
    LocaleInfo {
        code: "fr",
        label: "Français",
        dir: TextDirection::Ltr,
        matchers: &["fr", "fr-fr"],
        catalog: include_str!("../locales/fr.json"),
    },
    LocaleInfo {
        code: "ru-RU",
        label: "Русский (Россия)",
        dir: TextDirection::Ltr,
        matchers: &["ru", "ru-ru"],
        catalog: include_str!("../locales/ru-RU.json"),
    },
    LocaleInfo {
        code: "zh-CN",
        label: "简体中文（中国大陆）",
        dir: TextDirection::Ltr,
        matchers: &["zh", "zh-cn", "zh-hans"],
        catalog: include_str!("../locales/zh-CN.json"),
    },
    LocaleInfo {
        code: "fa-IR",
        label: "فارسی (ایران)",
        dir: TextDirection::Rtl,
        matchers: &["fa", "fa-ir", "prs", "pes"],
        catalog: include_str!("../locales/fa-IR.json"),
    },
    LocaleInfo {
        code: "ko-KP",
        label: "조선말 (조선민주주의인민공화국)",
        dir: TextDirection::Ltr,
        matchers: &["ko", "ko-kp"],
        catalog: include_str!("../locales/ko-KP.json"),
    },
];

pub fn locale_info(code: &str) -> Option<&'static LocaleInfo> {
    SUPPORTED_LOCALES
        .iter()
        .find(|l| l.code.eq_ignore_ascii_case(code))
}

/// Turn `fr_FR.UTF-8` or `zh_CN@pinyin` into `fr-fr` / `zh-cn`.
fn normalize(tag: &str) -> String {
    tag.split(['.', '@'])
        .next()
        .unwrap_or_default()
        .replace('_', "-")
        .to_ascii_lowercase()
}

/// Pick the best supported locale for an ordered list of language tags.
///
/// Exact matches on any candidate win over prefix matches; `en` when nothing
/// matches.
pub fn best_locale<S: AsRef<str>>(candidates: &[S]) -> &'static str {
    let normalized: Vec<String> = candidates
        .iter()
        .map(|c| normalize(c.as_ref()))
        .filter(|c| !c.is_empty() && c != "c" && c != "posix")
        .collect();

    for tag in &normalized {
        if let Some(locale) = SUPPORTED_LOCALES.iter().find(|l| l.matchers.contains(&tag.as_str())) {
            return locale.code;
        }
    }

    for tag in &normalized {
        let base = tag.split('-').next().unwrap_or_default();
        if let Some(locale) = SUPPORTED_LOCALES
            .iter()
            .find(|l| l.matchers.iter().any(|m| m.split('-').next() == Some(base)))
        {
            return locale.code;
        }
    }

    DEFAULT_LOCALE
}

/// Locale requested by the environment: `ZEROCALL_LANG`, then `LC_ALL`,
/// `LC_MESSAGES` and `LANG`.
pub fn detect_locale() -> &'static str {
    detect_locale_with(|name| std::env::var(name).ok())
}

fn detect_locale_with(lookup: impl Fn(&str) -> Option<String>) -> &'static str {
    let candidates: Vec<String> = ["ZEROCALL_LANG", "LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|name| lookup(name))
        .flat_map(|value| {
            // LANGUAGE-style lists: "fr:en"
            value.split(':').map(str::to_string).collect::<Vec<_>>()
        })
        .collect();
    best_locale(&candidates)
}

type Catalog = HashMap<String, String>;

struct I18nInner {
    catalogs: RwLock<HashMap<&'static str, Catalog>>,
    locale: watch::Sender<&'static str>,
    ready: watch::Sender<bool>,
}

/// Translation provider.
#[derive(Clone)]
pub struct I18n {
    inner: Arc<I18nInner>,
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for I18n {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I18n")
            .field("locale", &self.locale())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl I18n {
    /// An uninitialized provider; `translate` returns raw keys.
    pub fn new() -> Self {
        let (locale, _) = watch::channel(DEFAULT_LOCALE);
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(I18nInner {
                catalogs: RwLock::new(HashMap::new()),
                locale,
                ready,
            }),
        }
    }

    /// Load every catalog, select `requested` (or the environment's locale)
    /// and publish readiness. Returns the selected locale code.
    pub fn initialize(&self, requested: Option<&str>) -> &'static str {
        let mut catalogs = HashMap::new();
        for info in SUPPORTED_LOCALES {
            match serde_json::from_str::<Catalog>(info.catalog) {
                Ok(catalog) => {
                    catalogs.insert(info.code, catalog);
                }
                Err(e) => log::warn!("Skipping {} strings: {}", info.code, e),
            }
        }
        *self
            .inner
            .catalogs
            .write()
            .unwrap_or_else(PoisonError::into_inner) = catalogs;

        let locale = match requested {
            Some(tag) => best_locale(&[tag]),
            None => detect_locale(),
        };
        self.inner.locale.send_replace(locale);
        self.inner.ready.send_replace(true);
        log::info!("Using locale {}", locale);
        locale
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Resolves once the catalogs are loaded.
    pub async fn ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn locale(&self) -> &'static str {
        *self.inner.locale.borrow()
    }

    pub fn text_direction(&self) -> TextDirection {
        locale_info(self.locale())
            .map(|l| l.dir)
            .unwrap_or(TextDirection::Ltr)
    }

    /// Switch locale. Unsupported codes are ignored and return `false`.
    pub fn set_locale(&self, code: &str) -> bool {
        let Some(info) = locale_info(code) else {
            log::warn!("Unsupported locale {}", code);
            return false;
        };
        self.inner.locale.send_if_modified(|current| {
            if *current == info.code {
                false
            } else {
                *current = info.code;
                true
            }
        });
        true
    }

    /// Receiver that changes whenever the locale does, so visible text can
    /// be refreshed.
    pub fn on_locale_change(&self) -> watch::Receiver<&'static str> {
        self.inner.locale.subscribe()
    }

    /// Text for `key` in the current locale, falling back to English, then
    /// to the key itself.
    pub fn translate(&self, key: &str) -> String {
        if !self.is_ready() {
            return key.to_string();
        }
        let catalogs = self
            .inner
            .catalogs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        [self.locale(), DEFAULT_LOCALE]
            .iter()
            .find_map(|code| catalogs.get(code).and_then(|c| c.get(key)))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(locale: &str) -> I18n {
        let i18n = I18n::new();
        i18n.initialize(Some(locale));
        i18n
    }

    #[test]
    fn test_raw_keys_before_initialize() {
        let i18n = I18n::new();
        assert!(!i18n.is_ready());
        assert_eq!(i18n.translate("invitation_link_copied"), "invitation_link_copied");
    }

    #[test]
    fn test_translate_and_fallbacks() {
        let i18n = ready("fr");
        assert_eq!(i18n.translate("call_connected"), "Appel connecté");
        assert_eq!(i18n.translate("no_such_key"), "no_such_key");

        // ko-KP has no "remote_speaking" entry
        assert!(i18n.set_locale("ko-KP"));
        assert_eq!(i18n.translate("remote_speaking"), "Remote participant is speaking");
    }

    #[test]
    fn test_every_catalog_parses() {
        for info in SUPPORTED_LOCALES {
            let catalog: Catalog = serde_json::from_str(info.catalog).unwrap();
            assert!(catalog.contains_key("mic_off"), "{} lacks mic_off", info.code);
        }
    }

    #[test]
    fn test_english_catalog_is_complete() {
        let en: Catalog = serde_json::from_str(SUPPORTED_LOCALES[0].catalog).unwrap();
        for info in SUPPORTED_LOCALES {
            let other: Catalog = serde_json::from_str(info.catalog).unwrap();
            for key in other.keys() {
                assert!(en.contains_key(key), "{} key {} missing in en", info.code, key);
            }
        }
    }

    #[test]
    fn test_best_locale_matching() {
        assert_eq!(best_locale(&["ru_RU.UTF-8"]), "ru-RU");
        assert_eq!(best_locale(&["zh-Hans"]), "zh-CN");
        assert_eq!(best_locale(&["fa"]), "fa-IR");
        assert_eq!(best_locale(&["fr-CA"]), "fr");
        assert_eq!(best_locale(&["de-DE", "ko"]), "ko-KP");
        assert_eq!(best_locale(&["C"]), "en");
        assert_eq!(best_locale::<&str>(&[]), "en");
    }

    #[test]
    fn test_exact_match_beats_prefix() {
        // "ru-UA" only prefix-matches, "fr" matches exactly
        assert_eq!(best_locale(&["ru-UA", "fr"]), "fr");
    }

    #[test]
    fn test_detect_prefers_app_variable() {
        let env = |name: &str| match name {
            "ZEROCALL_LANG" => Some("zh_CN".to_string()),
            "LANG" => Some("fr_FR.UTF-8".to_string()),
            _ => None,
        };
        assert_eq!(detect_locale_with(env), "zh-CN");
        assert_eq!(detect_locale_with(|_| None), "en");
    }

    #[test]
    fn test_direction_and_unsupported_locale() {
        let i18n = ready("fa-IR");
        assert_eq!(i18n.text_direction(), TextDirection::Rtl);
        assert!(!i18n.set_locale("de"));
        assert_eq!(i18n.locale(), "fa-IR");
    }

    #[tokio::test]
    async fn test_readiness_and_change_notifications() {
        let i18n = I18n::new();
        let waiter = {
            let i18n = i18n.clone();
            tokio::spawn(async move {
                i18n.ready().await;
                i18n.translate("call_connected")
            })
        };
        i18n.initialize(Some("en"));
        assert_eq!(waiter.await.unwrap(), "Call connected");

        let mut changes = i18n.on_locale_change();
        changes.borrow_and_update();
        i18n.set_locale("ru-RU");
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), "ru-RU");
    }
}
