use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GuardError {
    #[error("Error reading rule document `{path}`")]
    #[diagnostic(
        code(routeguard::config_read),
        help("Check that the file exists and is readable by the server process")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing rule document `{path}`: {message}")]
    #[diagnostic(
        code(routeguard::config_parse),
        help("The rule document must be a YAML mapping with `controllerActionPermissions`, `customPermissions`, `defaultNoPermissionRoute`, `debug` and `testing` keys")
    )]
    ConfigParse { path: String, message: String },

    #[error("Invalid permission condition: {condition} for permission {permission}")]
    #[diagnostic(
        code(routeguard::rule_validation),
        help("Conditions have the form \"<Controller>@<action>\"; use `*` on either side as a wildcard")
    )]
    RuleValidation {
        permission: String,
        condition: String,
    },

    #[error("Invalid pattern `{pattern}` for permission {permission}: {message}")]
    #[diagnostic(
        code(routeguard::invalid_pattern),
        help("Custom permissions are regular expressions matched against `<controller path>@<action>`")
    )]
    InvalidPattern {
        permission: String,
        pattern: String,
        message: String,
    },

    #[error("Cannot extract a controller from handler `{0}`")]
    #[diagnostic(
        code(routeguard::descriptor),
        help("Handlers are identified as `<namespace>.Controllers.<Name>Controller@<action>`")
    )]
    DescriptorExtraction(String),

    #[error("No controller or method to match against")]
    #[diagnostic(code(routeguard::unresolvable))]
    Unresolvable,

    #[error("Cannot persist temporary permissions: {0}")]
    #[diagnostic(
        code(routeguard::persist),
        help("Temporary permissions can only be written in the testing environment with an error-free rule document")
    )]
    Persist(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(routeguard::io))]
    Io(#[from] std::io::Error),
}
