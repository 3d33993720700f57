//! Route paths.

pub const POST_REGISTER: &str = "/register";
pub const POST_LOGIN: &str = "/login";
pub const DELETE_LOGOUT: &str = "/logout";
pub const POST_REFRESH: &str = "/refresh";
pub const POST_PASSWORD_FORGET: &str = "/password/forget";
pub const POST_PASSWORD_RESET: &str = "/password/reset";
pub const GET_USERS_USERNAME: &str = "/users/{username}";
pub const POST_NODES_NID_TOKEN: &str = "/nodes/{nid}/token";
