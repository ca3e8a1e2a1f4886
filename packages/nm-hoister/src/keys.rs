use rstest::rstest;

/// Raw instance key, `<ident name>@<reference>`. Uniquely identifies a
/// package instance including its virtualization.
pub(crate) fn make_locator(ident_name: &str, reference: &str) -> String {
    format!("{ident_name}@{reference}")
}

/// Identity key: the locator with any virtual prefix stripped off the
/// reference. Two instances with equal idents resolve to the same package
/// version, even when wrapped differently.
pub(crate) fn make_ident(ident_name: &str, reference: &str) -> String {
    let real_reference = match reference.find('#') {
        Some(idx) => &reference[idx + 1..],
        None => reference,
    };

    make_locator(ident_name, real_reference)
}

/// Extracts the real package name out of a locator or ident. Scoped names
/// start with `@`, so the separator is the first `@` past position 0.
pub(crate) fn ident_name(locator: &str) -> &str {
    match locator[1..].find('@') {
        Some(idx) => &locator[..idx + 1],
        None => locator,
    }
}

/// Splits a `name@ident` or `name@reference` key into its two halves at
/// the first `@` past position 0.
pub(crate) fn split_key(key: &str) -> (&str, &str) {
    match key[1..].find('@') {
        Some(idx) => (&key[..idx + 1], &key[idx + 2..]),
        None => (key, ""),
    }
}

#[rstest]
#[case("ts-loader@npm:9.5.1", "ts-loader")]
#[case("@babel/core@npm:7.24.0", "@babel/core")]
#[case("root@workspace:.", "root")]
fn test_ident_name(#[case] locator: &str, #[case] expected: &str) {
    assert_eq!(ident_name(locator), expected);
}

#[rstest]
#[case("webpack", "npm:5.90.0", "webpack@npm:5.90.0")]
#[case("webpack", "virtual:1234#npm:5.90.0", "webpack@npm:5.90.0")]
#[case("@scope/pkg", "virtual:abcd#npm:1.0.0", "@scope/pkg@npm:1.0.0")]
fn test_make_ident(#[case] name: &str, #[case] reference: &str, #[case] expected: &str) {
    assert_eq!(make_ident(name, reference), expected);
}

#[rstest]
#[case("lodash@npm:4.17.21", "lodash", "npm:4.17.21")]
#[case("@types/node@npm:20.0.0", "@types/node", "npm:20.0.0")]
fn test_split_key(#[case] key: &str, #[case] name: &str, #[case] rest: &str) {
    assert_eq!(split_key(key), (name, rest));
}
