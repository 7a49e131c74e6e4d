//! The pick state machine.
//!
//! A pick walks NATIVE_TRY → PATCH_TRY → LLM_TRY, committing via the first
//! stage that fully applies, then validates and annotates. The working tree
//! is owned exclusively for the duration: a pick refuses to start on a dirty
//! tree, and every terminal outcome leaves the tree at the pre-pick HEAD or
//! the post-commit HEAD, never in between. Dependency picks run on an
//! explicit bounded stack with cycle detection, never as open recursion.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fs,
    path::Path,
};

use crate::{
    config::{LlmConfig, PatchConfig, PickOptions, SectionConfig, ValidationTrigger},
    diff::{CommitDiff, rewrite::PathRewriter},
    errors::PickError,
    llm::LlmClient,
    patch::{PatchTool, Reject},
    repair::{RepairContext, RepairEngine, unresolved_symbols},
    utils::{CancelFlag, CommandOutput},
    validate::ValidationRunner,
    vcs::{CherryPickStatus, CommitInfo, GitBackend},
};

/// The stage that produced a committed pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickAttempt {
    Native,
    PatchTool,
    LlmRepair,
}

impl PickAttempt {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickAttempt::Native => "native cherry-pick",
            PickAttempt::PatchTool => "patch tool",
            PickAttempt::LlmRepair => "LLM repair",
        }
    }
}

/// A successfully completed pick.
#[derive(Debug, Clone)]
pub struct PickOutcome {
    /// Id of the reconstructed commit at the destination HEAD.
    pub commit: String,
    pub succeeded_via: PickAttempt,
    /// Stages tried for the target commit, in order.
    pub attempts_made: Vec<PickAttempt>,
    /// Audit-trail lines appended to the commit message.
    pub annotations: Vec<String>,
    pub rejects_resolved: usize,
    /// True when a configured validation command ran (and therefore passed).
    pub validation_passed: bool,
    pub validation_output: Option<CommandOutput>,
    /// Dependency commits picked before the target, in pick order.
    pub dependencies_picked: Vec<String>,
}

/// Why one queue entry failed, seen by the dependency loop.
enum SingleFailure {
    Fatal(PickError),
    /// The LLM stage failed on symbols that name commits in the source
    /// ancestry; pick `deps` first and retry, or surface `error`.
    NeedsDeps {
        deps: Vec<String>,
        error: PickError,
    },
}

/// Per-entry bookkeeping threaded through the stages.
struct StageState<'a> {
    entry_head: &'a str,
    dep_for: Option<&'a str>,
}

pub struct Pipeline {
    git: GitBackend,
    patch: PatchTool,
    llm: Option<LlmClient>,
    rewriter: PathRewriter,
    options: PickOptions,
    section_config: SectionConfig,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(
        workdir: impl AsRef<Path>,
        options: PickOptions,
        llm_config: LlmConfig,
        patch_config: PatchConfig,
        section_config: SectionConfig,
        cancel: CancelFlag,
    ) -> Result<Self, PickError> {
        let git = GitBackend::new(
            workdir.as_ref(),
            options.subprocess_timeout(),
            cancel.clone(),
        );
        let patch = PatchTool::new(patch_config, options.subprocess_timeout(), cancel.clone())?;
        let llm = options
            .llm_enabled
            .then(|| LlmClient::new(llm_config));
        let rewriter = PathRewriter::new(options.path_rewrites.clone());
        Ok(Self {
            git,
            patch,
            llm,
            rewriter,
            options,
            section_config,
            cancel,
        })
    }

    /// Replace the LLM client; tests inject an in-memory transport here.
    pub fn with_llm_client(mut self, client: LlmClient) -> Self {
        self.llm = Some(client);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Pick one commit onto the current HEAD.
    ///
    /// On any failure the working tree and HEAD are restored to their
    /// pre-pick state, dependency commits included.
    pub fn pick(&mut self, commit_ref: &str) -> Result<PickOutcome, PickError> {
        self.cancel.check()?;

        // START: clear any lingering cherry-pick, then claim the tree.
        self.git.abort_cherry_pick()?;
        if !self.git.is_clean()? {
            return Err(PickError::WorkingTreeDirty);
        }
        let start_head = self.git.current_head()?;
        tracing::debug!("pick of {commit_ref} starting at {start_head}");

        match self.run_queue(commit_ref) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if let Err(rollback_error) = self.rollback(&start_head) {
                    return Err(PickError::RollbackFailed(rollback_error.to_string()));
                }
                tracing::warn!("pick of {commit_ref} failed, tree restored to {start_head}");
                Err(error)
            }
        }
    }

    /// Process the target and any dependency picks it requests. The loop
    /// always terminates: every queued dependency is paid for out of the
    /// depth budget, and repeat requests are filtered as cycles.
    fn run_queue(&mut self, commit_ref: &str) -> Result<PickOutcome, PickError> {
        let target = self.git.rev_parse(commit_ref)?;
        let mut budget = self.options.dependency_depth;
        let mut stack = vec![target.clone()];
        let mut in_stack: HashSet<String> = stack.iter().cloned().collect();
        let mut picked_deps: Vec<String> = Vec::new();
        let mut all_paths: BTreeSet<String> = BTreeSet::new();

        loop {
            self.cancel.check()?;
            let current = stack
                .last()
                .cloned()
                .unwrap_or_else(|| target.clone());
            let dep_for = (current != target).then_some(target.as_str());

            match self.pick_single(&current, dep_for, &mut all_paths) {
                Ok(outcome) => {
                    stack.pop();
                    in_stack.remove(&current);
                    if current == target {
                        return Ok(PickOutcome {
                            dependencies_picked: picked_deps,
                            ..outcome
                        });
                    }
                    tracing::debug!("dependency {current} picked for {target}");
                    picked_deps.push(current);
                }
                Err(SingleFailure::Fatal(error)) => return Err(error),
                Err(SingleFailure::NeedsDeps { deps, error }) => {
                    let fresh: Vec<String> = deps
                        .into_iter()
                        .filter(|d| !in_stack.contains(d) && !picked_deps.contains(d))
                        .collect();
                    if fresh.is_empty() {
                        return Err(error);
                    }
                    if fresh.len() as u32 > budget {
                        return Err(PickError::DependencyLimit(
                            self.options.dependency_depth,
                        ));
                    }
                    budget -= fresh.len() as u32;
                    tracing::debug!(
                        "queueing {} dependency pick(s) for {current}",
                        fresh.len()
                    );
                    // Oldest dependency must be picked first, so it goes on
                    // top of the stack last.
                    for dep in fresh.into_iter().rev() {
                        in_stack.insert(dep.clone());
                        stack.push(dep);
                    }
                }
            }
        }
    }

    /// Pick one queue entry; restore its entry state on failure so the queue
    /// can continue or the caller can roll back cleanly.
    fn pick_single(
        &self,
        commit_id: &str,
        dep_for: Option<&str>,
        all_paths: &mut BTreeSet<String>,
    ) -> Result<PickOutcome, SingleFailure> {
        let entry_head = self
            .git
            .current_head()
            .map_err(SingleFailure::Fatal)?;
        let state = StageState {
            entry_head: &entry_head,
            dep_for,
        };
        match self.attempt_stages(commit_id, &state, all_paths) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                if let Err(rollback_error) = self.rollback(&entry_head) {
                    return Err(SingleFailure::Fatal(PickError::RollbackFailed(
                        rollback_error.to_string(),
                    )));
                }
                Err(failure)
            }
        }
    }

    /// NATIVE_TRY → PATCH_TRY → LLM_TRY for one commit.
    fn attempt_stages(
        &self,
        commit_id: &str,
        state: &StageState<'_>,
        all_paths: &mut BTreeSet<String>,
    ) -> Result<PickOutcome, SingleFailure> {
        use SingleFailure::Fatal;

        let info = self.git.commit_info(commit_id).map_err(Fatal)?;
        let parent_rev = self.parent_revision(&info).map_err(Fatal)?;
        let mut attempts = Vec::new();

        // NATIVE_TRY. A native pick cannot rewrite paths, so with rewrites
        // configured its success could never be kept; skip it outright.
        if self.rewriter.is_identity() {
            attempts.push(PickAttempt::Native);
            let result = self
                .git
                .cherry_pick(commit_id, self.options.mainline_parent)
                .map_err(Fatal)?;
            match result.status {
                CherryPickStatus::Applied => {
                    tracing::debug!("native cherry-pick of {commit_id} applied");
                    let diff_text = self
                        .git
                        .diff_tree(commit_id, self.options.mainline_parent)
                        .map_err(Fatal)?;
                    let diff = CommitDiff::parse(&diff_text).map_err(Fatal)?;
                    let changed = changed_paths(&diff);

                    let annotations =
                        vec!["Applied with: native cherry-pick".to_string()];
                    let message = self
                        .build_message(&info, &annotations, state.dep_for)
                        .map_err(Fatal)?;
                    self.git.amend_message(&message).map_err(Fatal)?;

                    return self.validate_and_finish(
                        PickAttempt::Native,
                        attempts,
                        annotations,
                        0,
                        &changed,
                        all_paths,
                    );
                }
                CherryPickStatus::Conflict => {
                    let drive = PickError::CleanCherryPickFailed(commit_id.to_string());
                    tracing::debug!("{drive}; falling back to the patch stage");
                    self.git.abort_cherry_pick().map_err(Fatal)?;
                }
            }
        }

        // Decompose into per-file diffs and rewrite paths.
        let diff_text = self
            .git
            .diff_tree(commit_id, self.options.mainline_parent)
            .map_err(Fatal)?;
        let mut diff = CommitDiff::parse(&diff_text).map_err(Fatal)?;
        if diff.is_empty() {
            return Err(Fatal(PickError::EmptyDiff(commit_id.to_string())));
        }
        let originals: Vec<(Option<String>, Option<String>)> = diff
            .files
            .iter()
            .map(|f| (f.old_path.clone(), f.new_path.clone()))
            .collect();
        self.rewriter.rewrite(&mut diff);
        if diff.has_binary() {
            // Conservative: fail before any textual hunk is applied.
            return Err(Fatal(PickError::BinaryConflict(commit_id.to_string())));
        }
        let source_paths: HashMap<String, (Option<String>, Option<String>)> = diff
            .files
            .iter()
            .zip(originals)
            .map(|(f, orig)| (f.path().to_string(), orig))
            .collect();
        let changed = changed_paths(&diff);

        // Zero-hunk commits (pure rename/mode change) bypass patch and LLM.
        if diff.is_metadata_only() {
            attempts.push(PickAttempt::PatchTool);
            self.apply_metadata_only(&diff).map_err(Fatal)?;
            let annotations =
                vec!["Applied with: patch tool (metadata only)".to_string()];
            return self.commit_and_finish(
                &info,
                state,
                PickAttempt::PatchTool,
                attempts,
                annotations,
                0,
                &changed,
                all_paths,
            );
        }

        // PATCH_TRY: escalate through the fuzz ladder, each level against a
        // pristine tree.
        attempts.push(PickAttempt::PatchTool);
        let mut rejects: Vec<Reject> = Vec::new();
        let mut applied_fuzz = None;
        for &fuzz in self.patch.fuzz_ladder() {
            self.cancel.check().map_err(Fatal)?;
            self.git.reset_hard(state.entry_head).map_err(Fatal)?;
            self.git.clean_untracked().map_err(Fatal)?;

            let result = self
                .patch
                .apply(&diff, self.git.workdir(), fuzz)
                .map_err(Fatal)?;
            if result.fully_applied {
                applied_fuzz = Some(fuzz);
                break;
            }
            rejects = result.rejects;
        }

        if let Some(fuzz) = applied_fuzz {
            let annotations = vec![format!("Applied with: patch tool (fuzz={fuzz})")];
            return self.commit_and_finish(
                &info,
                state,
                PickAttempt::PatchTool,
                attempts,
                annotations,
                0,
                &changed,
                all_paths,
            );
        }

        if let Some(reject) = rejects
            .iter()
            .find(|r| r.hunk.is_pure_deletion() && r.similarity < 0.5)
        {
            return Err(Fatal(PickError::PatchUnresolvable(format!(
                "deletion-only hunk in `{}` has no matching lines in the destination",
                reject.path
            ))));
        }

        // PATCH_TRY → LLM_TRY.
        let Some(llm) = &self.llm else {
            return Err(Fatal(PickError::PatchRejected(rejects.len())));
        };
        if rejects.is_empty() {
            return Err(Fatal(PickError::PatchUnresolvable(
                "patch tool failed without emitting rejects".to_string(),
            )));
        }

        attempts.push(PickAttempt::LlmRepair);
        let engine = RepairEngine::new(&self.git, llm, self.section_config.clone());
        let ctx = RepairContext {
            commit: &info,
            parent_rev: parent_rev.as_deref(),
        };
        let mut resolved = 0usize;
        for reject in &rejects {
            self.cancel.check().map_err(Fatal)?;
            let (source_old, source_new) = source_paths
                .get(reject.path.as_str())
                .cloned()
                .unwrap_or((None, None));
            match engine.repair(reject, ctx, source_old.as_deref(), source_new.as_deref()) {
                Ok(outcome) => {
                    tracing::debug!("repaired hunk in {}: {}", outcome.path, outcome.summary);
                    resolved += 1;
                }
                Err(error) => {
                    // A single unresolved reject fails the whole pick; see
                    // whether missing symbols name dependency commits first.
                    if self.options.dependency_depth > 0 {
                        let deps = self
                            .dependency_candidates(commit_id, reject)
                            .map_err(Fatal)?;
                        if !deps.is_empty() {
                            return Err(SingleFailure::NeedsDeps { deps, error });
                        }
                    }
                    return Err(Fatal(error));
                }
            }
        }

        let annotations = vec![format!("Applied with: LLM repair ({resolved} hunks)")];
        self.commit_and_finish(
            &info,
            state,
            PickAttempt::LlmRepair,
            attempts,
            annotations,
            resolved,
            &changed,
            all_paths,
        )
    }

    /// Stage, commit with the annotated message, then validate.
    #[allow(clippy::too_many_arguments)]
    fn commit_and_finish(
        &self,
        info: &CommitInfo,
        state: &StageState<'_>,
        via: PickAttempt,
        attempts: Vec<PickAttempt>,
        annotations: Vec<String>,
        rejects_resolved: usize,
        changed: &[String],
        all_paths: &mut BTreeSet<String>,
    ) -> Result<PickOutcome, SingleFailure> {
        use SingleFailure::Fatal;

        let message = self
            .build_message(info, &annotations, state.dep_for)
            .map_err(Fatal)?;
        self.git.add_all().map_err(Fatal)?;
        self.git
            .commit(&message, Some(&info.author))
            .map_err(Fatal)?;
        self.validate_and_finish(via, attempts, annotations, rejects_resolved, changed, all_paths)
    }

    /// COMMIT → VALIDATE → DONE bookkeeping shared by every success path.
    fn validate_and_finish(
        &self,
        via: PickAttempt,
        attempts: Vec<PickAttempt>,
        annotations: Vec<String>,
        rejects_resolved: usize,
        changed: &[String],
        all_paths: &mut BTreeSet<String>,
    ) -> Result<PickOutcome, SingleFailure> {
        use SingleFailure::Fatal;

        all_paths.extend(changed.iter().cloned());
        let validation_output = self
            .run_validation(changed, all_paths)
            .map_err(Fatal)?;
        let commit = self.git.current_head().map_err(Fatal)?;
        tracing::debug!("pick committed as {commit} via {}", via.as_str());

        Ok(PickOutcome {
            commit,
            succeeded_via: via,
            attempts_made: attempts,
            annotations,
            rejects_resolved,
            validation_passed: validation_output.is_some(),
            validation_output,
            dependencies_picked: Vec::new(),
        })
    }

    fn run_validation(
        &self,
        pick_paths: &[String],
        all_paths: &BTreeSet<String>,
    ) -> Result<Option<CommandOutput>, PickError> {
        let Some(command) = &self.options.validation_command else {
            return Ok(None);
        };
        if self.options.run_validation_after == ValidationTrigger::None {
            return Ok(None);
        }
        let runner = ValidationRunner::new(
            command.clone(),
            self.options.validation_timeout(),
            self.cancel.clone(),
        );
        let paths: Vec<String> = match self.options.run_validation_after {
            ValidationTrigger::EachFile => pick_paths.to_vec(),
            ValidationTrigger::All => all_paths.iter().cloned().collect(),
            ValidationTrigger::None => unreachable!(),
        };
        runner.run(self.git.workdir(), &paths).map(Some)
    }

    /// The parent revision hunks were authored against, honoring mainline
    /// selection; `None` for a root commit.
    fn parent_revision(&self, info: &CommitInfo) -> Result<Option<String>, PickError> {
        match self.options.mainline_parent {
            Some(n) => {
                let index = n
                    .checked_sub(1)
                    .ok_or_else(|| {
                        PickError::InvalidConfig("mainline parent is 1-based".to_string())
                    })? as usize;
                info.parents
                    .get(index)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| {
                        PickError::InvalidConfig(format!(
                            "commit {} has no parent {n}",
                            info.id
                        ))
                    })
            }
            None => Ok(info.parents.first().cloned()),
        }
    }

    /// Apply a zero-hunk (rename/mode-only) diff directly to the tree.
    fn apply_metadata_only(&self, diff: &CommitDiff) -> Result<(), PickError> {
        for file in &diff.files {
            if file.is_rename() {
                let old = self.git.workdir().join(file.old_path.as_deref().unwrap_or_default());
                let new = self.git.workdir().join(file.new_path.as_deref().unwrap_or_default());
                if let Some(parent) = new.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&old, &new).map_err(|e| {
                    PickError::PatchUnresolvable(format!(
                        "cannot rename `{}`: {e}",
                        old.display()
                    ))
                })?;
            }
            #[cfg(unix)]
            if let Some(mode) = file.new_mode() {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(bits) = u32::from_str_radix(mode, 8) {
                    let path = self.git.workdir().join(file.path());
                    let perms = fs::Permissions::from_mode(bits & 0o777);
                    fs::set_permissions(path, perms)?;
                }
            }
        }
        Ok(())
    }

    /// Commits reachable from the source commit but not from HEAD whose
    /// subject names a symbol the reject needs, oldest first.
    fn dependency_candidates(
        &self,
        commit_id: &str,
        reject: &Reject,
    ) -> Result<Vec<String>, PickError> {
        let dest_content = fs::read_to_string(self.git.workdir().join(&reject.path))
            .unwrap_or_default();
        let symbols = unresolved_symbols(reject, &dest_content);
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!("unresolved symbols for {}: {:?}", reject.path, symbols);

        let candidates = self.git.log_between("HEAD", commit_id)?;
        Ok(candidates
            .into_iter()
            .filter(|(id, subject)| {
                id != commit_id && symbols.iter().any(|s| subject.contains(s.as_str()))
            })
            .map(|(id, _)| id)
            .collect())
    }

    /// Message reconstruction: the original text verbatim, one blank line,
    /// then the annotations in their contract order.
    fn build_message(
        &self,
        info: &CommitInfo,
        annotations: &[String],
        dep_for: Option<&str>,
    ) -> Result<String, PickError> {
        let mut message = info.message.trim_end().to_string();
        message.push_str("\n\n");
        for annotation in annotations {
            message.push_str(annotation);
            message.push('\n');
        }
        if let Some(target) = dep_for {
            message.push_str(&format!("Cherry-picked as dependency for {target}\n"));
        }
        if self.options.record_origin {
            message.push_str(&format!("(cherry picked from commit {})\n", info.id));
        }
        if self.options.signoff {
            let ident = self.git.committer_ident()?;
            message.push_str(&format!("Signed-off-by: {ident}\n"));
        }
        Ok(message)
    }

    fn rollback(&self, head: &str) -> Result<(), PickError> {
        // Runs on a cancellation-immune backend: a cancelled pick must still
        // restore the tree.
        let git = self.git.ignoring_cancel();
        git.abort_cherry_pick()?;
        git.reset_hard(head)?;
        git.clean_untracked()?;
        Ok(())
    }
}

/// Destination-relevant paths of a diff: both sides of every file, in file
/// order, deduplicated.
fn changed_paths(diff: &CommitDiff) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for file in &diff.files {
        for path in [file.old_path.as_deref(), file.new_path.as_deref()]
            .into_iter()
            .flatten()
        {
            if !paths.iter().any(|p| p == path) {
                paths.push(path.to_string());
            }
        }
    }
    paths
}
