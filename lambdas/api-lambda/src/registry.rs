use assignment_shared::error::HandlerError;
use assignment_shared::types::RequestContext;
use assignment_shared::{
    assignments, auth, batches, evaluator, mailing, retrieval, submissions, AppState,
};
use serde_json::Value;

/// Every handler a route may name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerId {
    Login,
    Signup,
    UserDetails,
    Courses,
    Modules,
    Batches,
    GenerateAssignment,
    UploadSubmission,
    EvaluateSubmission,
    RetrieveAssignments,
    SendMail,
}

/// `(package, class, method)` references accepted in the route mapping
const REFERENCES: &[(&str, &str, &str, HandlerId)] = &[
    ("auth", "Registration", "login", HandlerId::Login),
    ("auth", "Registration", "signup", HandlerId::Signup),
    ("batches", "Records", "user_details", HandlerId::UserDetails),
    ("batches", "Records", "courses", HandlerId::Courses),
    ("batches", "Records", "modules", HandlerId::Modules),
    ("batches", "Records", "list_batches", HandlerId::Batches),
    ("assignments", "Generator", "generate", HandlerId::GenerateAssignment),
    ("submissions", "Submissions", "upload", HandlerId::UploadSubmission),
    ("evaluator", "Evaluator", "evaluate", HandlerId::EvaluateSubmission),
    ("retrieval", "Retriever", "retrieve", HandlerId::RetrieveAssignments),
    ("mailing", "Mailer", "notify", HandlerId::SendMail),
];

impl HandlerId {
    pub fn resolve(package: &str, class: &str, method: &str) -> Option<Self> {
        REFERENCES
            .iter()
            .find(|(p, c, m, _)| *p == package && *c == class && *m == method)
            .map(|(_, _, _, id)| *id)
    }

    pub async fn invoke(self, state: &AppState, ctx: &RequestContext) -> Result<Value, HandlerError> {
        match self {
            HandlerId::Login => auth::login(state, ctx).await,
            HandlerId::Signup => auth::signup(state, ctx).await,
            HandlerId::UserDetails => batches::user_details(state, ctx).await,
            HandlerId::Courses => batches::courses(state, ctx).await,
            HandlerId::Modules => batches::modules(state, ctx).await,
            HandlerId::Batches => batches::list_batches(state, ctx).await,
            HandlerId::GenerateAssignment => assignments::generate(state, ctx).await,
            HandlerId::UploadSubmission => submissions::upload(state, ctx).await,
            HandlerId::EvaluateSubmission => evaluator::evaluate(state, ctx).await,
            HandlerId::RetrieveAssignments => retrieval::retrieve(state, ctx).await,
            HandlerId::SendMail => mailing::notify(state, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_exact() {
        assert_eq!(
            HandlerId::resolve("auth", "Registration", "login"),
            Some(HandlerId::Login)
        );
        assert_eq!(HandlerId::resolve("auth", "registration", "login"), None);
        assert_eq!(HandlerId::resolve("auth", "Registration", "logout"), None);
    }

    #[test]
    fn test_references_are_unique() {
        for (i, (p, c, m, _)) in REFERENCES.iter().enumerate() {
            let first = REFERENCES
                .iter()
                .position(|(p2, c2, m2, _)| p == p2 && c == c2 && m == m2);
            assert_eq!(first, Some(i), "duplicate reference {}.{}.{}", p, c, m);
        }
    }
}
