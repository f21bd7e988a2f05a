//! Signature tables and the pattern matcher.
//!
//! Every function here expects lower-cased text. The tables are process-wide
//! constants and safe to read from any number of scan threads.
//!
//! Suspicious-domain and exfiltration hits go through contextual suppression:
//! a hit only counts when an action verb appears within
//! [`CONTEXT_WINDOW`] characters before or after it. The legitimacy signals
//! reported alongside never reduce these counts; that reconciliation belongs
//! to the decision layer.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::trace;

/// Characters inspected on each side of a hit for an action verb.
pub const CONTEXT_WINDOW: usize = 50;

/// Cap applied to the network-to-game ratio.
pub const MAX_NETWORK_RATIO: f64 = 10.0;

/// Verbs that turn a domain or keyword mention into a likely network action.
pub const ACTION_VERBS: &[&str] = &["post", "send", "upload", "submit", "get", "http", "file"];

/// A named, read-only set of substring signatures.
#[derive(Debug)]
pub struct SignatureCategory {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
}

impl SignatureCategory {
    /// Number of signatures in this category found anywhere in `text`.
    pub fn distinct_hits(&self, text: &str) -> usize {
        self.patterns.iter().filter(|p| text.contains(*p)).count()
    }

    /// Total occurrences of all signatures in `text`.
    pub fn occurrences(&self, text: &str) -> usize {
        self.patterns.iter().map(|p| text.matches(*p).count()).sum()
    }

    /// Occurrences that have an action verb nearby.
    pub fn contextual_hits(&self, text: &str) -> usize {
        let mut hits = 0;
        let mut suppressed = 0;
        for p in self.patterns {
            for (start, m) in text.match_indices(*p) {
                if has_action_nearby(text, start, start + m.len()) {
                    hits += 1;
                } else {
                    suppressed += 1;
                }
            }
        }
        if suppressed > 0 {
            trace!(category = self.name, hits, suppressed, "contextual suppression");
        }
        hits
    }
}

pub static TOKEN_STEALING: SignatureCategory = SignatureCategory {
    name: "token-stealing",
    patterns: &[
        "token",
        "session",
        "auth",
        "mojang",
        "stealer",
        "accesstoken",
        "getsessionid",
        "func_148254_d",
        "launcher_accounts.json",
        "local storage/leveldb",
        "mfa.",
    ],
};

pub static EXFILTRATION: SignatureCategory = SignatureCategory {
    name: "exfiltration",
    patterns: &[
        "webhook",
        "user.home",
        "user.name",
        "os.name",
        "getenv",
        "ipify",
        "checkip",
        "getlocalhost",
        "getsystemclipboard",
        "createscreencapture",
        "gethardwareaddress",
    ],
};

pub static OBFUSCATION: SignatureCategory = SignatureCategory {
    name: "obfuscation",
    patterns: &[
        "base64",
        "getdecoder()",
        "getmimedecoder",
        "decodebase64",
        "parsebase64binary",
    ],
};

pub static SUSPICIOUS_DOMAINS: SignatureCategory = SignatureCategory {
    name: "suspicious-domains",
    patterns: &[
        "pastebin",
        "hastebin",
        "transfer.sh",
        "anonfiles",
        "gofile.io",
        "file.io",
        "ngrok",
        "iplogger",
        "grabify",
        "requestbin",
        "pipedream",
        "webhook.site",
        "api.telegram.org",
    ],
};

/// Legacy RAT strings. Each one is its own schema field, in this order.
pub static RAT_SIGNATURES: SignatureCategory = SignatureCategory {
    name: "rat-signatures",
    patterns: &["func_111286_b", "discòrd", "requestv2"],
};

pub static LEGITIMATE_DOMAINS: SignatureCategory = SignatureCategory {
    name: "legitimate-domains",
    patterns: &[
        "minecraft.net",
        "mojang.com",
        "minecraftservices.com",
        "curseforge.com",
        "modrinth.com",
        "github.com",
        "githubusercontent.com",
        "fabricmc.net",
        "minecraftforge.net",
        "neoforged.net",
        "quiltmc.org",
        "spongepowered.org",
        "jitpack.io",
    ],
};

/// Game and mod-loader API namespaces, in dotted form.
pub static LEGITIMATE_API_NAMESPACES: SignatureCategory = SignatureCategory {
    name: "legitimate-api-namespaces",
    patterns: &[
        "net.minecraft",
        "net.minecraftforge",
        "net.neoforged",
        "net.fabricmc",
        "org.quiltmc",
        "org.bukkit",
        "org.spongepowered",
        "com.mojang.brigadier",
    ],
};

pub static OBFUSCATION_TOOLS: SignatureCategory = SignatureCategory {
    name: "obfuscation-tools",
    patterns: &[
        "allatori",
        "zelix",
        "zkm",
        "stringer",
        "skidfuscator",
        "paramorphism",
        "branchlock",
        "radon",
        "caesium",
        "bozar",
        "superblaikman",
    ],
};

pub static SUSPICIOUS_PATHS: SignatureCategory = SignatureCategory {
    name: "suspicious-paths",
    patterns: &[
        "appdata",
        ".ssh",
        "/etc/passwd",
        "/etc/shadow",
        "system32",
        "launcher_accounts.json",
        "launcher_profiles.json",
        "local storage/leveldb",
        "login data",
        "cookies",
        ".minecraft/",
    ],
};

pub static REFLECTION: SignatureCategory = SignatureCategory {
    name: "reflection",
    patterns: &[
        "java.lang.reflect",
        "java/lang/reflect",
        "getdeclaredmethod",
        "getdeclaredfield",
        "setaccessible",
        "class.forname",
    ],
};

pub static COMMAND_EXECUTION: SignatureCategory = SignatureCategory {
    name: "command-execution",
    patterns: &[
        "getruntime().exec",
        "processbuilder",
        "cmd.exe",
        "/bin/sh",
        "powershell",
    ],
};

/// Mod-loader metadata files, matched against lower-cased entry paths.
pub const MOD_METADATA_FILES: &[&str] = &[
    "fabric.mod.json",
    "quilt.mod.json",
    "mcmod.info",
    "meta-inf/mods.toml",
    "meta-inf/neoforge.mods.toml",
    "plugin.yml",
];

static DISCORD_WEBHOOK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:canary\.|ptb\.)?discord(?:app)?\.com/api/webhooks/[0-9]+/[a-z0-9_-]+")
        .expect("valid regex")
});

static HTTP_OPERATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"openconnection\s*\(|setrequestmethod\s*\(|https?urlconnection|httpclient|httprequest|okhttp|"(?:get|post|put|delete|patch)""#,
    )
    .expect("valid regex")
});

/// One alternation over the API namespaces, longest first so that
/// `net.minecraftforge` is not also counted as `net.minecraft`, accepting
/// both `.` and `/` as the package separator.
static API_NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    let mut namespaces: Vec<&str> = LEGITIMATE_API_NAMESPACES.patterns.to_vec();
    namespaces.sort_by_key(|ns| std::cmp::Reverse(ns.len()));
    let alternation = namespaces
        .iter()
        .map(|ns| regex::escape(ns).replace(r"\.", "[./]"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).expect("valid regex")
});

/// Whether an action verb appears within the window around `text[start..end]`.
/// The matched text itself is not part of the window.
pub fn has_action_nearby(text: &str, start: usize, end: usize) -> bool {
    let before_start = text[..start]
        .char_indices()
        .rev()
        .nth(CONTEXT_WINDOW - 1)
        .map_or(0, |(i, _)| i);
    let after_end = text[end..]
        .char_indices()
        .nth(CONTEXT_WINDOW)
        .map_or(text.len(), |(i, _)| end + i);

    let before = &text[before_start..start];
    let after = &text[end..after_end];
    ACTION_VERBS
        .iter()
        .any(|verb| before.contains(verb) || after.contains(verb))
}

/// Whether an archive entry path names a mod-loader metadata file.
pub fn is_mod_metadata_entry(name: &str) -> bool {
    let lower = name.to_lowercase();
    MOD_METADATA_FILES
        .iter()
        .any(|m| lower == *m || lower.ends_with(&format!("/{m}")))
}

pub fn has_discord_webhook(text: &str) -> bool {
    DISCORD_WEBHOOK.is_match(text)
}

pub fn http_operation_count(text: &str) -> usize {
    HTTP_OPERATION.find_iter(text).count()
}

pub fn api_namespace_count(text: &str) -> usize {
    API_NAMESPACE.find_iter(text).count()
}

/// Presence flags for the legacy RAT strings, in schema order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RatSignatureFlags {
    pub func_111286_b: bool,
    pub discord_homoglyph: bool,
    pub requestv2: bool,
}

/// Raw signal counts from the signature categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternReport {
    pub token_access_patterns: usize,
    pub data_collection_patterns: usize,
    pub base64_usage: usize,
    pub suspicious_urls: usize,
    pub discord_webhook: bool,
    pub rat_signatures: RatSignatureFlags,
    pub legitimate_connections: bool,
    pub http_operations: usize,
    pub game_api_refs: usize,
    pub network_to_game_ratio: f64,
}

/// Legitimacy and legacy behavioral signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegitimacySignals {
    pub has_mod_metadata: bool,
    pub minecraft_api_usage: usize,
    pub obfuscation_tools: usize,
    pub suspicious_file_operations: usize,
    pub uses_reflection: bool,
    pub executes_commands: bool,
}

/// Run every signature category over a lower-cased blob.
pub fn match_patterns(text: &str) -> PatternReport {
    let http_operations = http_operation_count(text);
    let game_api_refs = api_namespace_count(text);
    let ratio = http_operations as f64 / game_api_refs.max(1) as f64;

    let rat = RAT_SIGNATURES.patterns;
    PatternReport {
        token_access_patterns: TOKEN_STEALING.distinct_hits(text),
        data_collection_patterns: EXFILTRATION.contextual_hits(text),
        base64_usage: OBFUSCATION.occurrences(text),
        suspicious_urls: SUSPICIOUS_DOMAINS.contextual_hits(text),
        discord_webhook: has_discord_webhook(text),
        rat_signatures: RatSignatureFlags {
            func_111286_b: text.contains(rat[0]),
            discord_homoglyph: text.contains(rat[1]),
            requestv2: text.contains(rat[2]),
        },
        legitimate_connections: LEGITIMATE_DOMAINS.distinct_hits(text) > 0,
        http_operations,
        game_api_refs,
        network_to_game_ratio: ratio.min(MAX_NETWORK_RATIO),
    }
}

/// Legitimacy checks over a lower-cased blob. `metadata_entry_seen` carries
/// what the walker saw in entry names. Metadata file names mentioned in the
/// text only count when `metadata_from_content` is set, which is reserved for
/// source trees that may not carry their resource files.
pub fn legitimacy_signals(
    text: &str,
    metadata_entry_seen: bool,
    metadata_from_content: bool,
) -> LegitimacySignals {
    let metadata_in_content = metadata_from_content
        && MOD_METADATA_FILES
            .iter()
            .filter_map(|m| m.rsplit('/').next())
            .any(|m| text.contains(m));

    LegitimacySignals {
        has_mod_metadata: metadata_entry_seen || metadata_in_content,
        minecraft_api_usage: api_namespace_count(text),
        obfuscation_tools: OBFUSCATION_TOOLS.occurrences(text),
        suspicious_file_operations: SUSPICIOUS_PATHS.occurrences(text),
        uses_reflection: REFLECTION.distinct_hits(text) > 0,
        executes_commands: COMMAND_EXECUTION.distinct_hits(text) > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pastebin_without_action_is_suppressed() {
        let text = "// mirror of the changelog lives on pastebin, ask in chat";
        assert_eq!(match_patterns(text).suspicious_urls, 0);
    }

    #[test]
    fn pastebin_with_nearby_post_counts() {
        let text = "string u = \"pastebin\"; client.post(u, payload);";
        assert_eq!(match_patterns(text).suspicious_urls, 1);
    }

    #[test]
    fn action_outside_window_does_not_count() {
        let padding = " ".repeat(CONTEXT_WINDOW + 5);
        let text = format!("pastebin{padding}post(");
        assert_eq!(match_patterns(&text).suspicious_urls, 0);
        let text = format!("post({padding}pastebin");
        assert_eq!(match_patterns(&text).suspicious_urls, 0);
    }

    #[test]
    fn window_is_char_based() {
        // Multi-byte padding must not split a char or widen the window.
        let padding = "é".repeat(CONTEXT_WINDOW - 6);
        let text = format!("send({padding}ngrok");
        assert!(has_action_nearby(&text, text.len() - 5, text.len()));
        let padding = "é".repeat(CONTEXT_WINDOW);
        let text = format!("send({padding}ngrok");
        assert!(!has_action_nearby(&text, text.len() - 5, text.len()));
    }

    #[test]
    fn keyword_does_not_vouch_for_itself() {
        // "getenv" contains "get" but needs a verb around it.
        assert_eq!(match_patterns("x = getenv;").data_collection_patterns, 0);
        assert_eq!(
            match_patterns("x = getenv; upload(x);").data_collection_patterns,
            1
        );
    }

    #[test]
    fn strict_webhook_regex() {
        let hit = "https://discord.com/api/webhooks/123456789/abc_def-ghi";
        assert!(match_patterns(hit).discord_webhook);
        let canary = "https://canary.discordapp.com/api/webhooks/1/x";
        assert!(match_patterns(canary).discord_webhook);
        // Documentation mention without an id/token shape.
        let doc = "see discord.com/api/webhooks for details";
        assert!(!match_patterns(doc).discord_webhook);
    }

    #[test]
    fn legitimate_signals_do_not_reduce_counts() {
        let text = "https://modrinth.com/mod/x; conn.post(\"https://pastebin.com\")";
        let report = match_patterns(text);
        assert!(report.legitimate_connections);
        assert_eq!(report.suspicious_urls, 1);
    }

    #[test]
    fn network_ratio_is_capped() {
        let calls = "openconnection(".repeat(50);
        let report = match_patterns(&calls);
        assert_eq!(report.http_operations, 50);
        assert_eq!(report.game_api_refs, 0);
        assert_eq!(report.network_to_game_ratio, MAX_NETWORK_RATIO);
    }

    #[test]
    fn network_ratio_divides_by_api_refs() {
        let text = "openconnection( net/minecraft/client net.fabricmc.api";
        let report = match_patterns(text);
        assert_eq!(report.http_operations, 1);
        assert_eq!(report.game_api_refs, 2);
        assert!((report.network_to_game_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn forge_namespace_is_counted_once() {
        assert_eq!(api_namespace_count("net.minecraftforge.fml"), 1);
        assert_eq!(api_namespace_count("net/minecraftforge/fml net/minecraft/world"), 2);
    }

    #[test]
    fn rat_signatures_flag_individually() {
        let report = match_patterns("call func_111286_b then discòrd");
        assert!(report.rat_signatures.func_111286_b);
        assert!(report.rat_signatures.discord_homoglyph);
        assert!(!report.rat_signatures.requestv2);
    }

    #[test]
    fn token_patterns_count_distinct() {
        let report = match_patterns("token token token session");
        assert_eq!(report.token_access_patterns, 2);
    }

    #[test]
    fn metadata_entries() {
        assert!(is_mod_metadata_entry("fabric.mod.json"));
        assert!(is_mod_metadata_entry("META-INF/mods.toml"));
        assert!(is_mod_metadata_entry("sub/plugin.yml"));
        assert!(!is_mod_metadata_entry("assets/notfabric.mod.json.bak"));
        assert!(!is_mod_metadata_entry("mods.toml"));
    }

    #[test]
    fn legitimacy_from_content() {
        let text = "loaded from fabric.mod.json; net.minecraft.client; java.lang.reflect.method";
        let signals = legitimacy_signals(text, false, true);
        assert!(signals.has_mod_metadata);
        assert_eq!(signals.minecraft_api_usage, 1);
        assert!(signals.uses_reflection);
        assert!(!signals.executes_commands);
    }

    #[test]
    fn metadata_mention_needs_trusted_source() {
        let text = "// see plugin.yml\nnet.minecraft.server; https://github.com/x";
        assert!(!legitimacy_signals(text, false, false).has_mod_metadata);
        assert!(legitimacy_signals(text, true, false).has_mod_metadata);
        assert!(legitimacy_signals(text, false, true).has_mod_metadata);
    }

    #[test]
    fn suspicious_paths_and_tools() {
        let text = "new file(appdata + \"/.minecraft/launcher_accounts.json\") // zelix";
        let signals = legitimacy_signals(text, false, false);
        assert_eq!(signals.suspicious_file_operations, 3);
        assert_eq!(signals.obfuscation_tools, 1);
    }
}
