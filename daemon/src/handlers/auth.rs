use subtle::ConstantTimeEq;
use tracing::warn;

use crate::protocol::*;
use crate::state::DaemonState;

/// Outcome of an auth request: the response line and whether it succeeded.
pub struct AuthOutcome {
    pub response: String,
    pub ok: bool,
}

pub fn authenticate(request: &Request, state: &DaemonState) -> AuthOutcome {
    let params: AuthParams = match parse_params(request) {
        Ok(p) => p,
        Err(response) => return AuthOutcome { response, ok: false },
    };

    // Check token
    match &state.token {
        Some(expected) if token_matches(expected, &params.token) => {
            AuthOutcome {
                response: success(request.id, AuthResult { ok: true }),
                ok: true,
            }
        }
        Some(_) => AuthOutcome {
            response: failure(request.id, AUTH_FAILED, "Invalid token"),
            ok: false,
        },
        // Auth not required, always succeed
        None => AuthOutcome {
            response: success(request.id, AuthResult { ok: true }),
            ok: true,
        },
    }
}

pub async fn handle(request: &Request, state: &DaemonState) -> String {
    authenticate(request, state).response
}

fn token_matches(expected: &str, token: &str) -> bool {
    let expected_bytes = expected.as_bytes();
    let token_bytes = token.as_bytes();

    if expected_bytes.len() != token_bytes.len() {
        warn!("Auth failed: token length mismatch");
        return false;
    }

    if expected_bytes.ct_eq(token_bytes).into() {
        true
    } else {
        warn!("Auth failed: invalid token");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runq_config::EngineConfig;
    use runq_engine::Engine;
    use serde_json::json;

    fn auth_request(token: &str) -> Request {
        Request {
            id: 1,
            method: METHOD_AUTH.to_string(),
            params: json!({ "token": token }),
        }
    }

    #[tokio::test]
    async fn test_token_checked() {
        let state = DaemonState::new(Some("secret".to_string()), Engine::start(EngineConfig::default()));
        assert!(authenticate(&auth_request("secret"), &state).ok);

        let rejected = authenticate(&auth_request("wrong"), &state);
        assert!(!rejected.ok);
        assert!(rejected.response.contains(AUTH_FAILED));
    }

    #[tokio::test]
    async fn test_no_token_always_ok() {
        let state = DaemonState::new(None, Engine::start(EngineConfig::default()));
        assert!(authenticate(&auth_request("anything"), &state).ok);
    }

    #[test]
    fn test_token_matches() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secreT"));
        assert!(!token_matches("secret", "secret2"));
        assert!(!token_matches("secret", ""));
    }
}
