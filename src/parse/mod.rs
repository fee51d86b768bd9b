//! Match parser.
//!
//! Walks every match card in a results page, extracts the fields with
//! [`FieldLocator`]s and assembles candidate [`MatchResult`]s for one
//! region. Cards with an unreadable date or team score are dropped; the
//! drops are counted so a run can report them.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::extract::{
    parse_card_date, parse_required_count, parse_selector, parse_stat_or_zero, ExtractError,
    FieldLocator,
};
use crate::models::{decide_winner, MatchResult, Player};

/// Errors raised while building a parser.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid selector for {field}: {source}")]
    Selector {
        field: &'static str,
        #[source]
        source: ExtractError,
    },
}

/// Selector strings for every field of a match card.
///
/// Defaults follow the markup of the LTA results pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardSelectors {
    pub card: String,
    pub match_id: String,
    pub date: String,
    pub team_a: String,
    pub team_b: String,
    pub score_a: String,
    pub score_b: String,
    pub duration: String,
    pub mvp: String,
    pub tournament_stage: String,
    pub vod: String,

    pub player_row: String,
    pub player_name: String,
    pub player_team: String,
    pub player_position: String,
    pub player_champion: String,
    pub kills: String,
    pub deaths: String,
    pub assists: String,
    pub cs: String,
    pub gold: String,
    pub damage_dealt: String,
    pub vision_score: String,
}

impl Default for CardSelectors {
    fn default() -> Self {
        Self {
            card: ".match-card".to_string(),
            match_id: "@data-match-id".to_string(),
            date: ".match-date".to_string(),
            team_a: ".team-a.team-name".to_string(),
            team_b: ".team-b.team-name".to_string(),
            score_a: ".team-a.score".to_string(),
            score_b: ".team-b.score".to_string(),
            duration: ".match-duration".to_string(),
            mvp: ".match-mvp".to_string(),
            tournament_stage: ".tournament-stage".to_string(),
            vod: "a.vod-link@href".to_string(),
            player_row: ".player-row".to_string(),
            player_name: ".player-name".to_string(),
            player_team: ".player-team".to_string(),
            player_position: ".player-position".to_string(),
            player_champion: ".player-champion".to_string(),
            kills: ".kills".to_string(),
            deaths: ".deaths".to_string(),
            assists: ".assists".to_string(),
            cs: ".cs".to_string(),
            gold: ".gold".to_string(),
            damage_dealt: ".damage".to_string(),
            vision_score: ".vision".to_string(),
        }
    }
}

struct CardLocators {
    match_id: FieldLocator,
    date: FieldLocator,
    team_a: FieldLocator,
    team_b: FieldLocator,
    score_a: FieldLocator,
    score_b: FieldLocator,
    duration: FieldLocator,
    mvp: FieldLocator,
    tournament_stage: FieldLocator,
    vod: FieldLocator,
}

struct PlayerLocators {
    name: FieldLocator,
    team: FieldLocator,
    position: FieldLocator,
    champion: FieldLocator,
    kills: FieldLocator,
    deaths: FieldLocator,
    assists: FieldLocator,
    cs: FieldLocator,
    gold: FieldLocator,
    damage_dealt: FieldLocator,
    vision_score: FieldLocator,
}

fn locator(field: &'static str, raw: &str) -> Result<FieldLocator, ParseError> {
    FieldLocator::parse(raw).map_err(|source| ParseError::Selector { field, source })
}

fn selector(field: &'static str, raw: &str) -> Result<Selector, ParseError> {
    parse_selector(raw).map_err(|source| ParseError::Selector { field, source })
}

/// A card that was left out of the output.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDrop {
    /// 1-based position among the page's cards
    pub index: usize,
    /// Match id as read from the card, if any
    pub match_id: Option<String>,
    pub reason: ExtractError,
}

/// Everything parsed from one page.
#[derive(Debug, Clone, Default)]
pub struct PageParse {
    pub matches: Vec<MatchResult>,
    pub cards_seen: usize,
    pub dropped: Vec<CardDrop>,
}

impl PageParse {
    pub fn cards_dropped(&self) -> usize {
        self.dropped.len()
    }
}

/// Parser for results pages.
pub struct MatchParser {
    card: Selector,
    player_row: Selector,
    fields: CardLocators,
    player: PlayerLocators,
}

impl MatchParser {
    /// Build a parser, compiling every selector up front.
    pub fn new(selectors: &CardSelectors) -> Result<Self, ParseError> {
        Ok(Self {
            card: selector("card", &selectors.card)?,
            player_row: selector("player_row", &selectors.player_row)?,
            fields: CardLocators {
                match_id: locator("match_id", &selectors.match_id)?,
                date: locator("date", &selectors.date)?,
                team_a: locator("team_a", &selectors.team_a)?,
                team_b: locator("team_b", &selectors.team_b)?,
                score_a: locator("score_a", &selectors.score_a)?,
                score_b: locator("score_b", &selectors.score_b)?,
                duration: locator("duration", &selectors.duration)?,
                mvp: locator("mvp", &selectors.mvp)?,
                tournament_stage: locator("tournament_stage", &selectors.tournament_stage)?,
                vod: locator("vod", &selectors.vod)?,
            },
            player: PlayerLocators {
                name: locator("player_name", &selectors.player_name)?,
                team: locator("player_team", &selectors.player_team)?,
                position: locator("player_position", &selectors.player_position)?,
                champion: locator("player_champion", &selectors.player_champion)?,
                kills: locator("kills", &selectors.kills)?,
                deaths: locator("deaths", &selectors.deaths)?,
                assists: locator("assists", &selectors.assists)?,
                cs: locator("cs", &selectors.cs)?,
                gold: locator("gold", &selectors.gold)?,
                damage_dealt: locator("damage_dealt", &selectors.damage_dealt)?,
                vision_score: locator("vision_score", &selectors.vision_score)?,
            },
        })
    }

    /// Iterate over the cards of an already-parsed document, in document
    /// order. Each item is either a candidate match or the reason the card
    /// was dropped.
    pub fn cards<'a>(&'a self, document: &'a Html, region: &'a str) -> Cards<'a> {
        Cards {
            parser: self,
            region,
            inner: document.select(&self.card).enumerate(),
        }
    }

    /// Parse a whole page for one region.
    pub fn parse_page(&self, html: &str, region: &str) -> PageParse {
        let document = Html::parse_document(html);
        let mut page = PageParse::default();

        for card in self.cards(&document, region) {
            page.cards_seen += 1;
            match card {
                Ok(m) => page.matches.push(m),
                Err(drop) => {
                    warn!(
                        region,
                        card = drop.index,
                        match_id = drop.match_id.as_deref().unwrap_or(""),
                        "Dropping match card: {}",
                        drop.reason
                    );
                    page.dropped.push(drop);
                }
            }
        }

        debug!(
            region,
            cards = page.cards_seen,
            parsed = page.matches.len(),
            dropped = page.dropped.len(),
            "Parsed results page"
        );
        page
    }

    fn parse_card(
        &self,
        card: ElementRef<'_>,
        region: &str,
        index: usize,
    ) -> Result<MatchResult, CardDrop> {
        let f = &self.fields;

        let match_id = f
            .match_id
            .extract_optional(card)
            .unwrap_or_else(|| format!("{}-{}", region, index));

        let dropped = |reason: ExtractError| CardDrop {
            index,
            match_id: Some(match_id.clone()),
            reason,
        };

        let date = parse_card_date("date", &f.date.extract(card)).map_err(dropped)?;
        let score_a = parse_required_count("scoreA", &f.score_a.extract(card)).map_err(dropped)?;
        let score_b = parse_required_count("scoreB", &f.score_b.extract(card)).map_err(dropped)?;

        let team_a = f.team_a.extract(card);
        let team_b = f.team_b.extract(card);
        let winner = decide_winner(&team_a, &team_b, score_a, score_b);

        let players = card
            .select(&self.player_row)
            .map(|row| self.parse_player(row))
            .collect();

        let now = Utc::now();
        Ok(MatchResult {
            match_id,
            date,
            team_a,
            team_b,
            score_a,
            score_b,
            winner,
            region: region.to_string(),
            players,
            duration: f.duration.extract_optional(card),
            mvp: f.mvp.extract_optional(card),
            tournament_stage: f.tournament_stage.extract_optional(card),
            vod: f.vod.extract_optional(card),
            created_at: now,
            updated_at: now,
        })
    }

    fn parse_player(&self, row: ElementRef<'_>) -> Player {
        let p = &self.player;
        Player {
            name: p.name.extract(row),
            team: p.team.extract(row),
            position: p.position.extract(row),
            champion: p.champion.extract(row),
            kills: parse_stat_or_zero(&p.kills.extract(row)),
            deaths: parse_stat_or_zero(&p.deaths.extract(row)),
            assists: parse_stat_or_zero(&p.assists.extract(row)),
            cs: parse_stat_or_zero(&p.cs.extract(row)),
            gold: parse_stat_or_zero(&p.gold.extract(row)),
            damage_dealt: parse_stat_or_zero(&p.damage_dealt.extract(row)),
            vision_score: parse_stat_or_zero(&p.vision_score.extract(row)),
        }
    }
}

impl Default for MatchParser {
    fn default() -> Self {
        Self::new(&CardSelectors::default()).expect("default card selectors are valid")
    }
}

/// Lazy iterator over the cards of one page.
pub struct Cards<'a> {
    parser: &'a MatchParser,
    region: &'a str,
    inner: std::iter::Enumerate<scraper::html::Select<'a, 'a>>,
}

impl Iterator for Cards<'_> {
    type Item = Result<MatchResult, CardDrop>;

    fn next(&mut self) -> Option<Self::Item> {
        let (i, card) = self.inner.next()?;
        Some(self.parser.parse_card(card, self.region, i + 1))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Render one player row in the default markup.
    pub fn player_row(name: &str, team: &str, champion: &str, kda: (&str, &str, &str)) -> String {
        format!(
            r#"<div class="player-row">
                <span class="player-name">{name}</span>
                <span class="player-team">{team}</span>
                <span class="player-position">Mid</span>
                <span class="player-champion">{champion}</span>
                <span class="kills">{}</span>
                <span class="deaths">{}</span>
                <span class="assists">{}</span>
                <span class="cs">245</span>
                <span class="gold">12,450</span>
                <span class="damage">18300</span>
                <span class="vision">41</span>
            </div>"#,
            kda.0, kda.1, kda.2
        )
    }

    /// Render one match card in the default markup.
    pub fn card(
        id: Option<&str>,
        date: &str,
        teams: (&str, &str),
        scores: (&str, &str),
        rows: &[String],
    ) -> String {
        let id_attr = id
            .map(|id| format!(r#" data-match-id="{id}""#))
            .unwrap_or_default();
        format!(
            r#"<div class="match-card"{id_attr}>
                <span class="match-date">{date}</span>
                <span class="team-a team-name">{}</span>
                <span class="team-a score">{}</span>
                <span class="team-b score">{}</span>
                <span class="team-b team-name">{}</span>
                <span class="match-duration">31:20</span>
                {}
            </div>"#,
            teams.0,
            scores.0,
            scores.1,
            teams.1,
            rows.join("\n")
        )
    }

    /// Wrap cards in a results page.
    pub fn page(cards: &[String]) -> String {
        format!(
            r#"<html><body><section class="recent-matches">{}</section></body></html>"#,
            cards.join("\n")
        )
    }
}
