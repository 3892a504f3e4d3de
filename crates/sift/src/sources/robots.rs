//! robots.txt parsing and rule matching
//!
//! Implements the de-facto robots exclusion rules: user-agent groups,
//! longest-match precedence between Allow and Disallow, `*` wildcards and
//! the `$` end anchor. A missing or unreadable robots.txt is treated by the
//! caller as "allow all".

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone)]
struct Group {
    user_agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt for one host
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    groups: Vec<Group>,
}

impl RobotsTxt {
    /// Parse robots.txt content. Unknown directives are ignored.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        // Consecutive user-agent lines share one group.
        let mut last_was_agent = false;

        for raw_line in content.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    let agent = value.to_ascii_lowercase();
                    match current.as_mut() {
                        Some(group) if last_was_agent => group.user_agents.push(agent),
                        _ => {
                            if let Some(done) = current.take() {
                                groups.push(done);
                            }
                            current = Some(Group {
                                user_agents: vec![agent],
                                rules: Vec::new(),
                            });
                        }
                    }
                    last_was_agent = true;
                }
                "allow" | "disallow" => {
                    last_was_agent = false;
                    if let Some(group) = current.as_mut() {
                        // An empty Disallow means "allow everything".
                        if value.is_empty() {
                            continue;
                        }
                        group.rules.push(Rule {
                            allow: field == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if let Some(done) = current.take() {
            groups.push(done);
        }

        Self { groups }
    }

    /// Whether `user_agent` may fetch `path`.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        let path = if path.is_empty() { "/" } else { path };
        let mut verdict = true;
        let mut best_len = 0usize;

        for rule in &group.rules {
            if pattern_matches(&rule.pattern, path) {
                let specificity = rule.pattern.len();
                // Longest match wins; Allow wins ties.
                if specificity > best_len || (specificity == best_len && rule.allow) {
                    best_len = specificity;
                    verdict = rule.allow;
                }
            }
        }

        verdict
    }

    /// The most specific group applying to `user_agent`: the longest matching
    /// agent token, with `*` as the fallback.
    fn group_for(&self, user_agent: &str) -> Option<&Group> {
        let ua = user_agent.to_ascii_lowercase();
        let mut best: Option<(&Group, usize)> = None;
        let mut wildcard: Option<&Group> = None;

        for group in &self.groups {
            for agent in &group.user_agents {
                if agent == "*" {
                    wildcard.get_or_insert(group);
                } else if ua.contains(agent.as_str()) {
                    let len = agent.len();
                    if best.map_or(true, |(_, b)| len > b) {
                        best = Some((group, len));
                    }
                }
            }
        }

        best.map(|(g, _)| g).or(wildcard)
    }
}

/// Match a robots pattern against a path: prefix semantics, `*` matches any
/// run of characters, `$` anchors the end.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            if !path.starts_with(segment) {
                return false;
            }
            pos = segment.len();
        } else {
            match path[pos..].find(segment) {
                Some(found) => pos = pos + found + segment.len(),
                None => return false,
            }
        }
    }

    if anchored {
        // The last segment must reach the end of the path.
        if segments.last().map_or(true, |s| !s.is_empty()) {
            return pos == path.len();
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# comments are ignored
User-agent: *
Disallow: /admin
Disallow: /private/
Allow: /private/public

User-agent: siftbot
Disallow: /only-for-sift
";

    #[test]
    fn wildcard_group_disallows_prefixes() {
        let robots = RobotsTxt::parse(ROBOTS);
        assert!(!robots.is_allowed("somebot/1.0", "/admin"));
        assert!(!robots.is_allowed("somebot/1.0", "/admin/panel"));
        assert!(!robots.is_allowed("somebot/1.0", "/private/data"));
        assert!(robots.is_allowed("somebot/1.0", "/blog/post"));
    }

    #[test]
    fn longest_match_allows_carved_out_subtree() {
        let robots = RobotsTxt::parse(ROBOTS);
        assert!(robots.is_allowed("somebot/1.0", "/private/public/page"));
    }

    #[test]
    fn specific_group_overrides_wildcard() {
        let robots = RobotsTxt::parse(ROBOTS);
        // siftbot matches its own group, which does not block /admin.
        assert!(robots.is_allowed("siftbot/0.3 (ingestion bot)", "/admin"));
        assert!(!robots.is_allowed("siftbot/0.3 (ingestion bot)", "/only-for-sift"));
    }

    #[test]
    fn empty_or_missing_rules_allow_everything() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow:\n");
        assert!(robots.is_allowed("anybot", "/anything"));

        let empty = RobotsTxt::parse("");
        assert!(empty.is_allowed("anybot", "/anything"));
    }

    #[test]
    fn wildcards_and_anchors() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /*.json$\nDisallow: /tmp*/x\n");
        assert!(!robots.is_allowed("bot", "/data/export.json"));
        assert!(robots.is_allowed("bot", "/data/export.json.html"));
        assert!(!robots.is_allowed("bot", "/tmp123/x"));
        assert!(robots.is_allowed("bot", "/tmp123/y"));
    }

    #[test]
    fn consecutive_agent_lines_share_a_group() {
        let robots = RobotsTxt::parse("User-agent: a\nUser-agent: b\nDisallow: /x\n");
        assert!(!robots.is_allowed("a", "/x"));
        assert!(!robots.is_allowed("b", "/x"));
        assert!(robots.is_allowed("c", "/x"));
    }
}
