// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence and model layer for the forge server.
//!
//! Every entity has a `*Store` trait and a SQLite-backed `*Repository`
//! implementing it. Operations that touch several tables run in one
//! transaction; counters on users, repositories, labels and milestones are
//! kept consistent inside those transactions.

pub mod access;
pub mod action;
pub mod branch;
pub mod comment;
pub mod commit_status;
pub mod dependency;
pub mod error;
pub mod hook_task;
pub mod issue;
pub mod label;
pub mod locked_resource;
pub mod milestone;
pub mod notification;
pub mod org;
mod pattern;
pub mod pool;
pub mod protected_branch;
pub mod public_key;
pub mod pull;
pub mod release;
pub mod repo;
pub mod resource_index;
pub mod review;
pub mod team;
pub mod types;
pub mod user;
pub mod webhook;

#[cfg(test)]
pub mod testing;

pub use access::{AccessRepository, AccessStore, Collaborator};
pub use action::{Action, ActionRepository, ActionStore, ActionType, FeedOptions, NewAction};
pub use branch::{Branch, BranchRepository, BranchStore, NewBranch};
pub use comment::{Comment, CommentRepository, CommentStore, CommentType, CreateCommentOptions, RefParseOptions};
pub use commit_status::{
	calc_commit_status, hash_context, CommitStatus, CommitStatusRepository, CommitStatusState, CommitStatusStore,
	NewCommitStatus,
};
pub use dependency::{DependencyRepository, DependencyStore, IssueDependency};
pub use error::{DbError, Result};
pub use hook_task::{
	HookRequest, HookResponse, HookTask, HookTaskCleanup, HookTaskRepository, HookTaskStore, NewHookTask,
};
pub use issue::{Issue, IssueListOptions, IssueRepository, IssueSort, IssueStore, NewIssueOptions};
pub use label::{normalize_label_color, Label, LabelRepository, LabelStore, LabelUpdate, NewLabel};
pub use locked_resource::{LockedResource, LockedResourceRepository, LockedResourceStore};
pub use milestone::{Milestone, MilestoneRepository, MilestoneStore, MilestoneUpdate, NewMilestone};
pub use notification::{
	Notification, NotificationRepository, NotificationSource, NotificationStatus, NotificationStore,
};
pub use org::{NewOrganization, OrgRepository, OrgStore, OrgUser};
pub use pattern::is_plain_name;
pub use pool::{create_pool, run_migrations};
pub use protected_branch::{ProtectedBranch, ProtectedBranchRepository, ProtectedBranchStore};
pub use public_key::{
	calc_fingerprint, parse_authorized_key, DeployKey, KeyType, PublicKey, PublicKeyRepository, PublicKeyStore,
};
pub use pull::{
	is_work_in_progress, NewPullRequest, PullRequest, PullRequestFlow, PullRequestRepository, PullRequestStatus,
	PullRequestStore, DEFAULT_WIP_PREFIXES,
};
pub use release::{NewRelease, Release, ReleaseListOptions, ReleaseRepository, ReleaseStore};
pub use repo::{NewRepository, RepoRepository, RepoStore, Repository, RepositoryUpdate};
pub use resource_index::{ResourceIndexKind, ResourceIndexRepository, ResourceIndexStore, MAX_INDEX_ATTEMPTS};
pub use review::{CreateReviewOptions, Review, ReviewRepository, ReviewStore, ReviewType};
pub use team::{NewTeam, Team, TeamRepository, TeamStore, TeamUpdate, OWNER_TEAM_NAME};
pub use types::{AccessMode, ListOptions, Visibility};
pub use user::{
	validate_repo_name, validate_user_name, EmailAddress, NewUser, User, UserKind, UserRepository, UserStore,
};
pub use webhook::{
	HookContentType, HookEvent, HookEventType, HookEvents, HookStatus, HookType, NewWebhook, Webhook,
	WebhookRepository, WebhookStore,
};
