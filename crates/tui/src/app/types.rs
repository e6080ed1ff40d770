use appauth_core::{AuthError, UserInfoOutcome};

pub enum AppAsyncEvent {
    AuthorizationCompleted {
        result: Result<(), AuthError>,
    },
    ProfileFetched {
        result: Result<Option<UserInfoOutcome>, AuthError>,
    },
}
