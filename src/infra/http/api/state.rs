use std::sync::Arc;

use crate::application::{auth::AuthService, library::LibraryService};

#[derive(Clone)]
pub struct ApiState {
    pub library: Arc<LibraryService>,
    pub auth: Arc<AuthService>,
}
