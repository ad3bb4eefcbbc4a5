//! CLI parsing tests for directory command.

#[cfg(test)]
mod tests {
    use crate::cli::Args;
    use crate::output::OutputFormat;
    use clap::Parser;
    use rstest::rstest;

    crate::cli_error_test! {
        command: "directory",
        test_name: test_directory_takes_no_arguments,
        args: ["users"],
    }

    #[rstest]
    fn test_directory_parses() {
        let args = Args::try_parse_from(["rest_shape", "directory"]).unwrap();
        assert!(matches!(args.command, crate::commands::Command::Directory(_)));
        assert_eq!(args.format, OutputFormat::Table);
    }

    #[rstest]
    fn test_unknown_command_is_captured() {
        let args = Args::try_parse_from(["rest_shape", "describe", "users"]).unwrap();
        match args.command {
            crate::commands::Command::Unknown(args) => assert_eq!(args, vec!["describe", "users"]),
            _ => panic!("Expected Unknown command"),
        }
    }
}
