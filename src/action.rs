//! Post-login actions executed on each account's session.
//!
//! An [`Action`] runs against an already-logged-in [`Driver`] session. Variants
//! cover the supported portal interactions; all of them are driver-agnostic and
//! report a coarse [`ActionOutcome`] rather than failing the whole batch.
//!
//! Multi-target actions pace their driver interactions with a jittered delay so
//! a run does not hammer the portal at machine speed.

use crate::config::DelayRange;
use crate::driver::{Driver, Selector};
use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

/// Result of executing one action on one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action completed.
    Succeeded,
    /// The desired end state already held (e.g. already a group member).
    AlreadySatisfied,
    /// The action could not complete; the message names what went wrong.
    Failed(String),
}

impl ActionOutcome {
    /// Whether the desired end state holds after execution.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Succeeded | Self::AlreadySatisfied)
    }
}

/// A portal interaction performed once per logged-in account.
#[async_trait]
pub trait Action: Send + Sync {
    /// Short human-readable description for logs and reports.
    fn description(&self) -> String;

    /// Executes the action on a logged-in session.
    ///
    /// # Errors
    ///
    /// Returns an error only for driver backend failures; portal-level
    /// problems (missing elements, already-satisfied state) are expressed
    /// through [`ActionOutcome`].
    async fn execute(&self, driver: &mut dyn Driver) -> Result<ActionOutcome>;
}

/// Posts the same comment to a list of discussion targets.
///
/// Each target opens in its own tab, which is closed again before moving on, so
/// the session's primary tab stays on the portal.
#[derive(Debug, Clone)]
pub struct PostComment {
    /// Discussion URLs to comment on, in order.
    pub targets: Vec<String>,
    /// The comment input surface.
    pub comment_box: Selector,
    /// The control that submits the comment.
    pub submit_button: Selector,
    /// Comment text.
    pub text: String,
    /// Jittered delay between targets.
    pub jitter: DelayRange,
}

#[async_trait]
impl Action for PostComment {
    fn description(&self) -> String {
        format!("post comment to {} target(s)", self.targets.len())
    }

    #[instrument(name = "PostComment::execute", skip_all, fields(targets = self.targets.len()))]
    async fn execute(&self, driver: &mut dyn Driver) -> Result<ActionOutcome> {
        let mut failed = 0usize;

        for (n, target) in self.targets.iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(self.jitter.sample()).await;
            }

            driver.open_tab(target).await?;

            if driver.is_present(&self.comment_box).await? {
                driver.type_text(&self.comment_box, &self.text).await?;
                driver.click(&self.submit_button).await?;
                debug!(target = %target, "Comment posted");
            } else {
                // Locked threads and removed posts have no comment box; skip
                // the target rather than aborting the remainder.
                warn!(target = %target, "Comment box not present, skipping target");
                failed += 1;
            }

            driver.close_tab().await?;
        }

        if failed == 0 {
            Ok(ActionOutcome::Succeeded)
        } else if failed == self.targets.len() {
            Ok(ActionOutcome::Failed(format!(
                "no comment box on any of {failed} target(s)"
            )))
        } else {
            info!(failed, total = self.targets.len(), "Some targets skipped");
            Ok(ActionOutcome::Succeeded)
        }
    }
}

/// Joins a group, skipping accounts that are already members.
#[derive(Debug, Clone)]
pub struct JoinGroup {
    /// The group page URL.
    pub group_url: String,
    /// Element present only when the account is already a member.
    pub membership_marker: Selector,
    /// The join control.
    pub join_button: Selector,
}

#[async_trait]
impl Action for JoinGroup {
    fn description(&self) -> String {
        format!("join group {}", self.group_url)
    }

    #[instrument(name = "JoinGroup::execute", skip_all, fields(group = %self.group_url))]
    async fn execute(&self, driver: &mut dyn Driver) -> Result<ActionOutcome> {
        driver.navigate(&self.group_url).await?;

        if driver.is_present(&self.membership_marker).await? {
            debug!("Account is already a member");
            return Ok(ActionOutcome::AlreadySatisfied);
        }

        if !driver.is_present(&self.join_button).await? {
            return Ok(ActionOutcome::Failed(
                "join control not present on group page".into(),
            ));
        }

        driver.click(&self.join_button).await?;
        debug!("Join submitted");
        Ok(ActionOutcome::Succeeded)
    }
}

/// Likes and then favorites a target item, skipping already-liked targets.
#[derive(Debug, Clone)]
pub struct LikeFavorite {
    /// The target page URL.
    pub target_url: String,
    /// The like control.
    pub like_button: Selector,
    /// The favorite control.
    pub favorite_button: Selector,
    /// Element present only when the target is already liked.
    pub liked_marker: Selector,
    /// Jittered delay between the like and the favorite.
    pub jitter: DelayRange,
}

#[async_trait]
impl Action for LikeFavorite {
    fn description(&self) -> String {
        format!("like and favorite {}", self.target_url)
    }

    #[instrument(name = "LikeFavorite::execute", skip_all, fields(target = %self.target_url))]
    async fn execute(&self, driver: &mut dyn Driver) -> Result<ActionOutcome> {
        driver.navigate(&self.target_url).await?;

        if driver.is_present(&self.liked_marker).await? {
            debug!("Target already liked");
            return Ok(ActionOutcome::AlreadySatisfied);
        }

        if !driver.is_present(&self.like_button).await? {
            return Ok(ActionOutcome::Failed(
                "like control not present on target page".into(),
            ));
        }

        driver.click(&self.like_button).await?;
        tokio::time::sleep(self.jitter.sample()).await;

        if driver.is_present(&self.favorite_button).await? {
            driver.click(&self.favorite_button).await?;
        } else {
            // Some targets have no favorite control; the like alone satisfies
            // the action.
            warn!("Favorite control not present, like applied only");
        }

        Ok(ActionOutcome::Succeeded)
    }
}

/// Casts approval votes on a target, optionally several times.
#[derive(Debug, Clone)]
pub struct ApproveVote {
    /// The target page URL.
    pub target_url: String,
    /// The vote control.
    pub vote_button: Selector,
    /// Number of votes to cast.
    pub vote_count: u32,
    /// Jittered delay between repeated votes.
    pub jitter: DelayRange,
}

#[async_trait]
impl Action for ApproveVote {
    fn description(&self) -> String {
        format!("cast {} vote(s) on {}", self.vote_count, self.target_url)
    }

    #[instrument(
        name = "ApproveVote::execute",
        skip_all,
        fields(target = %self.target_url, votes = self.vote_count)
    )]
    async fn execute(&self, driver: &mut dyn Driver) -> Result<ActionOutcome> {
        driver.navigate(&self.target_url).await?;

        if !driver.is_present(&self.vote_button).await? {
            return Ok(ActionOutcome::Failed(
                "vote control not present on target page".into(),
            ));
        }

        for n in 0..self.vote_count {
            if n > 0 {
                tokio::time::sleep(self.jitter.sample()).await;
            }
            driver.click(&self.vote_button).await?;
        }

        debug!("Votes cast");
        Ok(ActionOutcome::Succeeded)
    }
}
