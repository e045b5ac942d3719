//! Reviewer selection matrix
//!
//! Static mapping from repo type to reviewer roles. Adding a reviewer means
//! extending this matrix and the prompt catalog; the loop engine never
//! switches on reviewer kind.

use crate::domain::RepoType;

/// A reviewer role: its identifier and the focus text its prompt gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewerRole {
    pub name: &'static str,
    pub focus: &'static str,
}

const BE_ARCHITECTURE: ReviewerRole = ReviewerRole {
    name: "reviewer_be_architecture",
    focus: "backend architecture",
};
const BE_SECURITY: ReviewerRole = ReviewerRole {
    name: "reviewer_be_security",
    focus: "backend security",
};
const BE_PERFORMANCE: ReviewerRole = ReviewerRole {
    name: "reviewer_be_performance",
    focus: "backend performance",
};
const FE_ARCHITECTURE: ReviewerRole = ReviewerRole {
    name: "reviewer_fe_architecture",
    focus: "frontend architecture",
};
const FE_QUALITY: ReviewerRole = ReviewerRole {
    name: "reviewer_fe_quality",
    focus: "frontend code quality",
};
const GENERAL: ReviewerRole = ReviewerRole {
    name: "reviewer_general",
    focus: "general code quality",
};
const FUNCTIONAL: ReviewerRole = ReviewerRole {
    name: "reviewer_functional",
    focus: "functional correctness",
};

/// Reviewer roles for a repo type
pub fn reviewers_for(repo_type: RepoType, include_functional: bool) -> Vec<ReviewerRole> {
    let mut roles = match repo_type {
        RepoType::Backend => vec![BE_ARCHITECTURE, BE_SECURITY, BE_PERFORMANCE],
        RepoType::Frontend => vec![FE_ARCHITECTURE, FE_QUALITY],
        RepoType::Fullstack => vec![BE_ARCHITECTURE, BE_SECURITY, BE_PERFORMANCE, FE_ARCHITECTURE, FE_QUALITY],
        RepoType::Other => vec![GENERAL],
    };
    if include_functional {
        roles.push(FUNCTIONAL);
    }
    roles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_matrix() {
        let roles = reviewers_for(RepoType::Backend, false);
        assert_eq!(roles.len(), 3);
        assert!(roles.iter().all(|r| r.name.starts_with("reviewer_be_")));
    }

    #[test]
    fn test_fullstack_is_union() {
        let roles = reviewers_for(RepoType::Fullstack, false);
        assert_eq!(roles.len(), 5);
    }

    #[test]
    fn test_other_gets_general() {
        let roles = reviewers_for(RepoType::Other, false);
        assert_eq!(roles, vec![GENERAL]);
    }

    #[test]
    fn test_functional_analyst_appended() {
        let with = reviewers_for(RepoType::Backend, true);
        assert_eq!(with.last().unwrap().name, "reviewer_functional");
        let without = reviewers_for(RepoType::Backend, false);
        assert_eq!(without.len() + 1, with.len());
    }

    #[test]
    fn test_role_names_unique() {
        for repo_type in [RepoType::Backend, RepoType::Frontend, RepoType::Fullstack, RepoType::Other] {
            let roles = reviewers_for(repo_type, true);
            let mut names: Vec<_> = roles.iter().map(|r| r.name).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), roles.len());
        }
    }
}
