//! Standard category tree and per-indexer category mapping
//!
//! Standard categories follow the Newznab numbering scheme.
//! Main categories are in thousands (1000, 2000, etc.) and subcategories
//! add tens (2010, 2020, etc.). Indexer specific categories live above
//! [`CUSTOM_CATEGORY_OFFSET`].

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Ids at or above this value are indexer specific (1:1 with a native category)
pub const CUSTOM_CATEGORY_OFFSET: i32 = 100_000;

/// A mapping from an indexer's native category to a standard category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMapping {
    /// The indexer's native category key (numeric id or free text)
    pub tracker_id: String,
    /// The standard (or custom) category id
    pub torznab_cat: i32,
    /// Native description of the category
    pub description: Option<String>,
}

impl CategoryMapping {
    pub fn new(tracker_id: impl Into<String>, torznab_cat: i32, desc: Option<&str>) -> Self {
        Self {
            tracker_id: tracker_id.into(),
            torznab_cat,
            description: desc.map(str::to_string),
        }
    }
}

/// A standard category definition
#[derive(Debug, Clone)]
pub struct TorznabCategory {
    pub id: i32,
    pub name: &'static str,
    pub parent_id: Option<i32>,
}

impl TorznabCategory {
    pub const fn new(id: i32, name: &'static str, parent_id: Option<i32>) -> Self {
        Self {
            id,
            name,
            parent_id,
        }
    }

    /// Check if this is a parent category
    pub fn is_parent(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Standard categories (Newznab numbering)
pub static TORZNAB_CATEGORIES: &[TorznabCategory] = &[
    // Console (1000)
    TorznabCategory::new(1000, "Console", None),
    TorznabCategory::new(1010, "Console/NDS", Some(1000)),
    TorznabCategory::new(1020, "Console/PSP", Some(1000)),
    TorznabCategory::new(1030, "Console/Wii", Some(1000)),
    TorznabCategory::new(1040, "Console/XBox", Some(1000)),
    TorznabCategory::new(1050, "Console/XBox 360", Some(1000)),
    TorznabCategory::new(1060, "Console/Wiiware", Some(1000)),
    TorznabCategory::new(1070, "Console/XBox 360 DLC", Some(1000)),
    TorznabCategory::new(1080, "Console/PS3", Some(1000)),
    TorznabCategory::new(1090, "Console/Other", Some(1000)),
    TorznabCategory::new(1110, "Console/3DS", Some(1000)),
    TorznabCategory::new(1120, "Console/PS Vita", Some(1000)),
    TorznabCategory::new(1130, "Console/WiiU", Some(1000)),
    TorznabCategory::new(1140, "Console/XBox One", Some(1000)),
    TorznabCategory::new(1180, "Console/PS4", Some(1000)),
    // Movies (2000)
    TorznabCategory::new(2000, "Movies", None),
    TorznabCategory::new(2010, "Movies/Foreign", Some(2000)),
    TorznabCategory::new(2020, "Movies/Other", Some(2000)),
    TorznabCategory::new(2030, "Movies/SD", Some(2000)),
    TorznabCategory::new(2040, "Movies/HD", Some(2000)),
    TorznabCategory::new(2045, "Movies/UHD", Some(2000)),
    TorznabCategory::new(2050, "Movies/BluRay", Some(2000)),
    TorznabCategory::new(2060, "Movies/3D", Some(2000)),
    TorznabCategory::new(2070, "Movies/DVD", Some(2000)),
    TorznabCategory::new(2080, "Movies/WEB-DL", Some(2000)),
    TorznabCategory::new(2090, "Movies/x265", Some(2000)),
    // Audio (3000)
    TorznabCategory::new(3000, "Audio", None),
    TorznabCategory::new(3010, "Audio/MP3", Some(3000)),
    TorznabCategory::new(3020, "Audio/Video", Some(3000)),
    TorznabCategory::new(3030, "Audio/Audiobook", Some(3000)),
    TorznabCategory::new(3040, "Audio/Lossless", Some(3000)),
    TorznabCategory::new(3050, "Audio/Other", Some(3000)),
    TorznabCategory::new(3060, "Audio/Foreign", Some(3000)),
    // PC (4000)
    TorznabCategory::new(4000, "PC", None),
    TorznabCategory::new(4010, "PC/0day", Some(4000)),
    TorznabCategory::new(4020, "PC/ISO", Some(4000)),
    TorznabCategory::new(4030, "PC/Mac", Some(4000)),
    TorznabCategory::new(4040, "PC/Mobile-Other", Some(4000)),
    TorznabCategory::new(4050, "PC/Games", Some(4000)),
    TorznabCategory::new(4060, "PC/Mobile-iOS", Some(4000)),
    TorznabCategory::new(4070, "PC/Mobile-Android", Some(4000)),
    // TV (5000)
    TorznabCategory::new(5000, "TV", None),
    TorznabCategory::new(5010, "TV/WEB-DL", Some(5000)),
    TorznabCategory::new(5020, "TV/Foreign", Some(5000)),
    TorznabCategory::new(5030, "TV/SD", Some(5000)),
    TorznabCategory::new(5040, "TV/HD", Some(5000)),
    TorznabCategory::new(5045, "TV/UHD", Some(5000)),
    TorznabCategory::new(5050, "TV/Other", Some(5000)),
    TorznabCategory::new(5060, "TV/Sport", Some(5000)),
    TorznabCategory::new(5070, "TV/Anime", Some(5000)),
    TorznabCategory::new(5080, "TV/Documentary", Some(5000)),
    TorznabCategory::new(5090, "TV/x265", Some(5000)),
    // XXX (6000)
    TorznabCategory::new(6000, "XXX", None),
    TorznabCategory::new(6010, "XXX/DVD", Some(6000)),
    TorznabCategory::new(6020, "XXX/WMV", Some(6000)),
    TorznabCategory::new(6030, "XXX/XviD", Some(6000)),
    TorznabCategory::new(6040, "XXX/x264", Some(6000)),
    TorznabCategory::new(6045, "XXX/UHD", Some(6000)),
    TorznabCategory::new(6050, "XXX/Pack", Some(6000)),
    TorznabCategory::new(6060, "XXX/ImageSet", Some(6000)),
    TorznabCategory::new(6070, "XXX/Other", Some(6000)),
    TorznabCategory::new(6080, "XXX/SD", Some(6000)),
    TorznabCategory::new(6090, "XXX/WEB-DL", Some(6000)),
    // Books (7000)
    TorznabCategory::new(7000, "Books", None),
    TorznabCategory::new(7010, "Books/Mags", Some(7000)),
    TorznabCategory::new(7020, "Books/EBook", Some(7000)),
    TorznabCategory::new(7030, "Books/Comics", Some(7000)),
    TorznabCategory::new(7040, "Books/Technical", Some(7000)),
    TorznabCategory::new(7050, "Books/Other", Some(7000)),
    TorznabCategory::new(7060, "Books/Foreign", Some(7000)),
    // Other (8000)
    TorznabCategory::new(8000, "Other", None),
    TorznabCategory::new(8010, "Other/Misc", Some(8000)),
    TorznabCategory::new(8020, "Other/Hashed", Some(8000)),
];

/// Common category constants for easy reference
pub mod cats {
    // Main categories
    pub const CONSOLE: i32 = 1000;
    pub const MOVIES: i32 = 2000;
    pub const AUDIO: i32 = 3000;
    pub const PC: i32 = 4000;
    pub const TV: i32 = 5000;
    pub const XXX: i32 = 6000;
    pub const BOOKS: i32 = 7000;
    pub const OTHER: i32 = 8000;
    pub const OTHER_MISC: i32 = 8010;

    // Movies subcategories
    pub const MOVIES_FOREIGN: i32 = 2010;
    pub const MOVIES_OTHER: i32 = 2020;
    pub const MOVIES_SD: i32 = 2030;
    pub const MOVIES_HD: i32 = 2040;
    pub const MOVIES_UHD: i32 = 2045;
    pub const MOVIES_BLURAY: i32 = 2050;
    pub const MOVIES_3D: i32 = 2060;
    pub const MOVIES_DVD: i32 = 2070;
    pub const MOVIES_WEBDL: i32 = 2080;

    // TV subcategories
    pub const TV_WEBDL: i32 = 5010;
    pub const TV_FOREIGN: i32 = 5020;
    pub const TV_SD: i32 = 5030;
    pub const TV_HD: i32 = 5040;
    pub const TV_UHD: i32 = 5045;
    pub const TV_OTHER: i32 = 5050;
    pub const TV_SPORT: i32 = 5060;
    pub const TV_ANIME: i32 = 5070;
    pub const TV_DOCUMENTARY: i32 = 5080;

    // Audio subcategories
    pub const AUDIO_MP3: i32 = 3010;
    pub const AUDIO_VIDEO: i32 = 3020;
    pub const AUDIO_AUDIOBOOK: i32 = 3030;
    pub const AUDIO_LOSSLESS: i32 = 3040;
    pub const AUDIO_OTHER: i32 = 3050;

    // Books subcategories
    pub const BOOKS_MAGS: i32 = 7010;
    pub const BOOKS_EBOOK: i32 = 7020;
    pub const BOOKS_COMICS: i32 = 7030;

    // PC subcategories
    pub const PC_0DAY: i32 = 4010;
    pub const PC_ISO: i32 = 4020;
    pub const PC_MAC: i32 = 4030;
    pub const PC_MOBILE_OTHER: i32 = 4040;
    pub const PC_GAMES: i32 = 4050;

    // Console subcategories
    pub const CONSOLE_NDS: i32 = 1010;
    pub const CONSOLE_PSP: i32 = 1020;
    pub const CONSOLE_WII: i32 = 1030;
    pub const CONSOLE_XBOX: i32 = 1040;
    pub const CONSOLE_XBOX360: i32 = 1050;
    pub const CONSOLE_PS3: i32 = 1080;
    pub const CONSOLE_OTHER: i32 = 1090;
    pub const CONSOLE_XBOX_ONE: i32 = 1140;
    pub const CONSOLE_PS4: i32 = 1180;
}

/// Get a category by ID
pub fn get_category(id: i32) -> Option<&'static TorznabCategory> {
    TORZNAB_CATEGORIES.iter().find(|c| c.id == id)
}

/// Look up a standard category by its display name (e.g. "TV/HD")
pub fn get_category_by_name(name: &str) -> Option<&'static TorznabCategory> {
    TORZNAB_CATEGORIES
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Get all subcategories for a parent category
pub fn get_subcategories(parent_id: i32) -> Vec<&'static TorznabCategory> {
    TORZNAB_CATEGORIES
        .iter()
        .filter(|c| c.parent_id == Some(parent_id))
        .collect()
}

/// Get the parent category for a given category
pub fn get_parent_category(id: i32) -> Option<&'static TorznabCategory> {
    let cat = get_category(id)?;
    cat.parent_id.and_then(get_category)
}

/// Expand categories to include all subcategories
/// E.g., [2000] -> [2000, 2010, 2020, 2030, 2040, 2045, 2050, 2060, 2070, 2080, 2090]
pub fn expand_categories(categories: &[i32]) -> Vec<i32> {
    let mut expanded = vec![];

    for &cat in categories {
        expanded.push(cat);

        if cat >= CUSTOM_CATEGORY_OFFSET {
            continue;
        }

        for torznab_cat in TORZNAB_CATEGORIES {
            if torznab_cat.parent_id == Some(cat) {
                expanded.push(torznab_cat.id);
            }
        }
    }

    expanded.sort();
    expanded.dedup();
    expanded
}

/// Custom category id for a native key. Numeric keys keep their number,
/// free-text keys hash to a stable value below the next offset.
pub fn custom_category_id(tracker_id: &str) -> i32 {
    let base = match tracker_id.trim().parse::<i32>() {
        Ok(id) if (0..CUSTOM_CATEGORY_OFFSET).contains(&id) => id,
        _ => {
            let digest = Sha1::digest(tracker_id.as_bytes());
            u16::from_le_bytes([digest[0], digest[1]]) as i32
        }
    };
    CUSTOM_CATEGORY_OFFSET + base
}

/// A node of an indexer's own category tree (standard parents, their used
/// subcategories, and custom categories at the root)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerCategory {
    pub id: i32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcategories: Vec<IndexerCategory>,
}

impl IndexerCategory {
    fn leaf(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            subcategories: vec![],
        }
    }
}

/// Bidirectional mapping between an indexer's native categories and the
/// standard tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMap {
    mappings: Vec<CategoryMapping>,
    tree: Vec<IndexerCategory>,
}

impl CategoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn mappings(&self) -> &[CategoryMapping] {
        &self.mappings
    }

    /// The categories this indexer exposes, parents first in insertion order
    pub fn tree(&self) -> &[IndexerCategory] {
        &self.tree
    }

    /// Register a native category. A description also creates a 1:1 custom
    /// category so clients can filter on the exact native category.
    pub fn add_mapping(&mut self, tracker_id: impl Into<String>, torznab_cat: i32, desc: Option<&str>) {
        let tracker_id = tracker_id.into();
        self.mappings
            .push(CategoryMapping::new(tracker_id.clone(), torznab_cat, desc));
        self.add_to_tree(torznab_cat, None);

        let Some(desc) = desc else {
            return;
        };

        let custom_id = custom_category_id(&tracker_id);
        self.mappings
            .push(CategoryMapping::new(tracker_id, custom_id, Some(desc)));
        self.add_to_tree(custom_id, Some(desc));
    }

    /// Distinct native keys, excluding the custom duplicates
    pub fn tracker_categories(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = vec![];
        for mapping in &self.mappings {
            if mapping.torznab_cat < CUSTOM_CATEGORY_OFFSET && !keys.contains(&mapping.tracker_id.as_str()) {
                keys.push(&mapping.tracker_id);
            }
        }
        keys
    }

    /// Raw lookup of a native key; empty when the key is unmapped
    pub fn lookup_native(&self, tracker_id: &str) -> Vec<i32> {
        let tracker_id = tracker_id.trim();
        if tracker_id.is_empty() {
            return vec![];
        }

        let mut ids: Vec<i32> = self
            .mappings
            .iter()
            .filter(|m| m.tracker_id.eq_ignore_ascii_case(tracker_id))
            .map(|m| m.torznab_cat)
            .collect();
        ids.dedup();
        ids
    }

    /// Map a native key to every standard category it belongs to.
    /// Unmapped keys land in Other so the release is never dropped.
    pub fn map_native_to_standard(&self, tracker_id: &str) -> Vec<i32> {
        let ids = self.lookup_native(tracker_id);
        if ids.is_empty() {
            vec![cats::OTHER]
        } else {
            ids
        }
    }

    /// Same as [`Self::lookup_native`] but keyed on the native description
    pub fn map_native_desc_to_standard(&self, desc: &str) -> Vec<i32> {
        let desc = desc.trim();
        if desc.is_empty() {
            return vec![];
        }

        let mut ids: Vec<i32> = self
            .mappings
            .iter()
            .filter(|m| {
                m.description
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(desc))
            })
            .map(|m| m.torznab_cat)
            .collect();
        ids.dedup();
        ids
    }

    /// Native keys to send for a set of requested standard categories.
    ///
    /// Each requested id is expanded to its descendants. When the indexer has no
    /// native key for a requested subcategory, the parent's keys are used instead.
    pub fn map_standard_to_native(&self, categories: &[i32]) -> Vec<String> {
        let mut keys: Vec<String> = vec![];

        for &cat in categories {
            let expanded = expand_categories(&[cat]);
            let mut found = self.keys_for(|id| expanded.contains(&id));

            if found.is_empty() {
                if let Some(parent) = get_parent_category(cat) {
                    found = self.keys_for(|id| id == parent.id);
                }
            }

            for key in found {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        keys
    }

    /// Classify a flat list of native keys into the standard tree
    pub fn resolve_tree<'a, I>(&self, tracker_ids: I) -> Vec<i32>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids: Vec<i32> = vec![];
        for key in tracker_ids {
            for id in self.lookup_native(key) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        if ids.is_empty() {
            ids.push(cats::OTHER);
        }
        ids
    }

    /// Filter requested categories down to those this indexer knows
    pub fn supported_categories(&self, categories: &[i32]) -> Vec<i32> {
        categories
            .iter()
            .copied()
            .filter(|id| {
                self.tree
                    .iter()
                    .any(|c| c.id == *id || c.subcategories.iter().any(|s| s.id == *id))
            })
            .collect()
    }

    fn keys_for(&self, predicate: impl Fn(i32) -> bool) -> Vec<String> {
        let mut keys: Vec<String> = vec![];
        for mapping in &self.mappings {
            if predicate(mapping.torznab_cat) && !keys.contains(&mapping.tracker_id) {
                keys.push(mapping.tracker_id.clone());
            }
        }
        keys
    }

    fn add_to_tree(&mut self, id: i32, custom_name: Option<&str>) {
        let Some(standard) = get_category(id) else {
            // custom categories hang off the root
            if !self.tree.iter().any(|c| c.id == id) {
                let name = custom_name.map(str::to_string).unwrap_or_else(|| id.to_string());
                self.tree.push(IndexerCategory::leaf(id, name));
            }
            return;
        };

        let parent = match standard.parent_id.and_then(get_category) {
            Some(parent) => parent,
            None => {
                if !self.tree.iter().any(|c| c.id == id) {
                    self.tree.push(IndexerCategory::leaf(id, standard.name));
                }
                return;
            }
        };

        let node = match self.tree.iter_mut().position(|c| c.id == parent.id) {
            Some(index) => &mut self.tree[index],
            None => {
                self.tree.push(IndexerCategory::leaf(parent.id, parent.name));
                let last = self.tree.len() - 1;
                &mut self.tree[last]
            }
        };

        if !node.subcategories.iter().any(|c| c.id == id) {
            node.subcategories
                .push(IndexerCategory::leaf(id, standard.name));
        }
    }
}
