#![forbid(unsafe_code)]

//! Replay scripts: one orchestrator action per line, `#` starts a comment.
//!
//! ```text
//! mount q=fate
//! query fate/stay
//! facet + tag:g1:Action
//! wait 400
//! page 2
//! settle
//! view
//! ```

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use kagami_core::{Density, EntityKind, FacetMode, SelectedFacet, SortDir, SortKey};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Mount(String),
    Query(String),
    Page(u32),
    Sort(SortKey, SortDir),
    Facet(SelectedFacet),
    Unfacet(EntityKind, String),
    Clear,
    Retry,
    Density(Density),
    /// Fail the next request with this HTTP status.
    Fail(u16),
    Wait(Duration),
    Settle,
    View,
}

fn target(raw: &str) -> Result<(EntityKind, String, Option<String>)> {
    let mut parts = raw.splitn(3, ':');
    let kind = parts.next().and_then(EntityKind::parse).ok_or_else(|| anyhow!("unknown entity kind in {raw:?}"))?;
    let id = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| anyhow!("missing id in {raw:?}"))?;
    Ok((kind, id.to_string(), parts.next().map(str::to_string)))
}

fn step(line: &str) -> Result<Step> {
    let (cmd, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    Ok(match cmd {
        "mount" => Step::Mount(rest.to_string()),
        "query" => Step::Query(rest.to_string()),
        "page" => Step::Page(rest.parse().context("page expects a number")?),
        "sort" => {
            let (key, dir) = rest.split_once(char::is_whitespace).unwrap_or((rest, "asc"));
            let key = SortKey::parse(key).ok_or_else(|| anyhow!("unknown sort key {key:?}"))?;
            let dir = SortDir::parse(dir.trim()).ok_or_else(|| anyhow!("unknown sort direction {dir:?}"))?;
            Step::Sort(key, dir)
        }
        "facet" => {
            let (sign, raw) = rest.split_once(char::is_whitespace).ok_or_else(|| anyhow!("facet expects +|- kind:id[:name]"))?;
            let mode = match sign {
                "+" => FacetMode::Include,
                "-" => FacetMode::Exclude,
                other => bail!("facet mode must be + or -, got {other:?}"),
            };
            let (kind, id, name) = target(raw.trim())?;
            let facet = SelectedFacet::new(kind, id, mode);
            Step::Facet(match name {
                Some(n) => facet.with_name(n),
                None => facet,
            })
        }
        "unfacet" => {
            let (kind, id, _) = target(rest)?;
            Step::Unfacet(kind, id)
        }
        "clear" => Step::Clear,
        "retry" => Step::Retry,
        "density" => Step::Density(Density::parse(rest).ok_or_else(|| anyhow!("unknown density {rest:?}"))?),
        "fail" => Step::Fail(rest.parse().context("fail expects an http status")?),
        "wait" => Step::Wait(Duration::from_millis(rest.parse().context("wait expects milliseconds")?)),
        "settle" => Step::Settle,
        "view" => Step::View,
        other => bail!("unknown command {other:?}"),
    })
}

pub fn parse(script: &str) -> Result<Vec<Step>> {
    let mut out = Vec::new();
    for (n, line) in script.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        out.push(step(line).with_context(|| format!("line {}: {line}", n + 1))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_skips_comments() {
        let steps = parse(
            "# warm up\nmount q=fate\nfacet + tag:g1:Action\nfacet - staff:s4\nsort rating desc\nwait 250\npage 2 # next\nview\n",
        )
        .unwrap();
        assert_eq!(steps.len(), 7);
        assert_eq!(steps[0], Step::Mount("q=fate".into()));
        assert_eq!(
            steps[1],
            Step::Facet(SelectedFacet::new(EntityKind::Tag, "g1", FacetMode::Include).with_name("Action"))
        );
        assert_eq!(steps[2], Step::Facet(SelectedFacet::new(EntityKind::Staff, "s4", FacetMode::Exclude)));
        assert_eq!(steps[4], Step::Wait(Duration::from_millis(250)));
        assert_eq!(steps[5], Step::Page(2));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse("mount\nbogus 1\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        assert!(parse("facet * tag:g1").is_err());
        assert!(parse("unfacet nope:x").is_err());
    }
}
