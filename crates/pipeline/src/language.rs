//! Language tag registry.
//!
//! Maps between the client-facing ISO 639-1 short tags and the Flores-200
//! tags the translation model consumes. This is the only place either tag
//! form is interpreted; the table is fixed at startup and never mutated.

use std::collections::HashMap;

/// `(short tag, model tag, display name)` for every supported language.
const LANGUAGE_TABLE: &[(&str, &str, &str)] = &[
    // European
    ("en", "eng_Latn", "English"),
    ("es", "spa_Latn", "Spanish"),
    ("fr", "fra_Latn", "French"),
    ("de", "deu_Latn", "German"),
    ("it", "ita_Latn", "Italian"),
    ("pt", "por_Latn", "Portuguese"),
    ("nl", "nld_Latn", "Dutch"),
    ("pl", "pol_Latn", "Polish"),
    ("ru", "rus_Cyrl", "Russian"),
    ("uk", "ukr_Cyrl", "Ukrainian"),
    ("cs", "ces_Latn", "Czech"),
    ("sk", "slk_Latn", "Slovak"),
    ("ro", "ron_Latn", "Romanian"),
    ("hu", "hun_Latn", "Hungarian"),
    ("el", "ell_Grek", "Greek"),
    ("sv", "swe_Latn", "Swedish"),
    ("no", "nob_Latn", "Norwegian"),
    ("da", "dan_Latn", "Danish"),
    ("fi", "fin_Latn", "Finnish"),
    ("bg", "bul_Cyrl", "Bulgarian"),
    ("hr", "hrv_Latn", "Croatian"),
    ("sr", "srp_Cyrl", "Serbian"),
    ("sl", "slv_Latn", "Slovenian"),
    ("lt", "lit_Latn", "Lithuanian"),
    ("lv", "lvs_Latn", "Latvian"),
    ("et", "est_Latn", "Estonian"),
    // Asian
    ("zh", "zho_Hans", "Chinese"),
    ("ja", "jpn_Jpan", "Japanese"),
    ("ko", "kor_Hang", "Korean"),
    ("hi", "hin_Deva", "Hindi"),
    ("bn", "ben_Beng", "Bengali"),
    ("ta", "tam_Taml", "Tamil"),
    ("th", "tha_Thai", "Thai"),
    ("vi", "vie_Latn", "Vietnamese"),
    ("id", "ind_Latn", "Indonesian"),
    ("ms", "zsm_Latn", "Malay"),
    ("tl", "tgl_Latn", "Tagalog"),
    ("my", "mya_Mymr", "Burmese"),
    ("km", "khm_Khmr", "Khmer"),
    // Middle Eastern & African
    ("ar", "arb_Arab", "Arabic"),
    ("he", "heb_Hebr", "Hebrew"),
    ("tr", "tur_Latn", "Turkish"),
    ("fa", "pes_Arab", "Persian"),
    ("sw", "swh_Latn", "Swahili"),
    ("am", "amh_Ethi", "Amharic"),
    ("yo", "yor_Latn", "Yoruba"),
    ("ig", "ibo_Latn", "Igbo"),
    ("ha", "hau_Latn", "Hausa"),
    ("zu", "zul_Latn", "Zulu"),
];

/// Bidirectional short-tag / model-tag lookup, built once at startup.
pub struct LanguageRegistry {
    short_to_model: HashMap<&'static str, &'static str>,
    model_to_short: HashMap<&'static str, &'static str>,
    names: HashMap<&'static str, &'static str>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut short_to_model = HashMap::with_capacity(LANGUAGE_TABLE.len());
        let mut model_to_short = HashMap::with_capacity(LANGUAGE_TABLE.len());
        let mut names = HashMap::with_capacity(LANGUAGE_TABLE.len());
        for (short, model, name) in LANGUAGE_TABLE {
            short_to_model.insert(*short, *model);
            model_to_short.insert(*model, *short);
            names.insert(*short, *name);
        }
        Self {
            short_to_model,
            model_to_short,
            names,
        }
    }

    /// Model tag for a client-facing short tag.
    pub fn resolve(&self, short: &str) -> Option<&'static str> {
        self.short_to_model.get(short).copied()
    }

    /// Short tag for a model tag. Used when the ASR reports a detected
    /// language in model form.
    pub fn short_for(&self, model_tag: &str) -> Option<&'static str> {
        self.model_to_short.get(model_tag).copied()
    }

    pub fn is_supported(&self, short: &str) -> bool {
        self.short_to_model.contains_key(short)
    }

    /// Human-readable display name for a short tag.
    pub fn language_name(&self, short: &str) -> Option<&'static str> {
        self.names.get(short).copied()
    }

    /// All supported short tags, in table order.
    pub fn supported(&self) -> impl Iterator<Item = &'static str> {
        LANGUAGE_TABLE.iter().map(|(short, _, _)| *short)
    }

    pub fn len(&self) -> usize {
        self.short_to_model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.short_to_model.is_empty()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
