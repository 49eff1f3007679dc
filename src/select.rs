use crate::version::VersionInfo;

/// Which catalog entries may become the upgrade target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub include_beta: bool,
    pub include_rc: bool,
    /// Allow moving to a different major/minor line.
    pub allow_major_jump: bool,
}

impl SelectionPolicy {
    /// Someone already running a pre-release wants pre-release upgrades:
    /// a local beta turns on betas and RCs, a local RC turns on RCs.
    pub fn adjusted_for(self, local: &VersionInfo) -> Self {
        let mut policy = self;
        if local.is_beta() {
            policy.include_beta = true;
            policy.include_rc = true;
        }
        if local.is_rc() {
            policy.include_rc = true;
        }
        policy
    }

    fn admits(&self, local: &VersionInfo, candidate: &VersionInfo) -> bool {
        if candidate.is_rc() && !self.include_rc {
            return false;
        }
        if candidate.is_beta() && !self.include_beta {
            return false;
        }
        self.allow_major_jump || candidate.same_line(local)
    }
}

/// Pick the first entry of a newest-first `catalog` that `policy` admits.
///
/// `None` means nothing qualified. A result equal to `local` means the
/// installation is already current.
pub fn select_target(
    local: &VersionInfo,
    catalog: &[VersionInfo],
    policy: SelectionPolicy,
) -> Option<VersionInfo> {
    let policy = policy.adjusted_for(local);
    catalog.iter().find(|candidate| policy.admits(local, candidate)).copied()
}
