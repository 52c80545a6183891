use chrono::NaiveDate;
use dlgate::key::{Directive, KeyDeriver, RequestContext};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext::new("198.51.100.7", "curl/8.0", day(1))
}

fn keys() -> KeyDeriver {
    KeyDeriver::new(test_utils::TEST_SECRET)
}

#[test]
fn same_inputs_same_key() {
    let a = keys().derive("a.zip", Directive::Default, &ctx());
    let b = keys().derive("a.zip", Directive::Default, &ctx());
    assert!(a.is_some());
    assert_eq!(a, b);
}

#[test]
fn default_key_binds_file_ip_agent_and_day() {
    let base = keys().derive("a.zip", Directive::Default, &ctx()).unwrap();

    let other_file = keys().derive("b.zip", Directive::Default, &ctx()).unwrap();
    let mut other_ip = ctx();
    other_ip.ip = "198.51.100.8".into();
    let mut other_agent = ctx();
    other_agent.user_agent = "wget".into();
    let mut other_day = ctx();
    other_day.today = day(2);

    assert_ne!(base, other_file);
    assert_ne!(base, keys().derive("a.zip", Directive::Default, &other_ip).unwrap());
    assert_ne!(base, keys().derive("a.zip", Directive::Default, &other_agent).unwrap());
    assert_ne!(base, keys().derive("a.zip", Directive::Default, &other_day).unwrap());
}

#[test]
fn ip_forever_ignores_day_and_agent() {
    let a = keys().derive("a.zip", Directive::IpForever, &ctx()).unwrap();
    let later = RequestContext::new("198.51.100.7", "other", day(20));
    assert_eq!(a, keys().derive("a.zip", Directive::IpForever, &later).unwrap());

    let elsewhere = RequestContext::new("192.0.2.1", "curl/8.0", day(1));
    assert_ne!(a, keys().derive("a.zip", Directive::IpForever, &elsewhere).unwrap());
}

#[test]
fn universal_key_is_shared() {
    let a = keys().derive("a.zip", Directive::Universal, &ctx()).unwrap();
    let anyone = RequestContext::new("192.0.2.1", "bot", day(30));
    assert_eq!(a, keys().derive("a.zip", Directive::Universal, &anyone).unwrap());
    assert_eq!(
        a,
        keys()
            .derive("a.zip", Directive::parse(Some("cache-compatible")), &anyone)
            .unwrap()
    );
}

#[test]
fn surrounding_slashes_do_not_matter() {
    assert_eq!(
        keys().derive("/dir/a.zip/", Directive::Universal, &ctx()),
        keys().derive("dir/a.zip", Directive::Universal, &ctx())
    );
}

#[test]
fn secret_changes_every_key() {
    let other = KeyDeriver::new("rotated");
    for directive in [Directive::Default, Directive::IpForever, Directive::Universal] {
        assert_ne!(
            keys().derive("a.zip", directive, &ctx()),
            other.derive("a.zip", directive, &ctx())
        );
    }
}

#[test]
fn empty_file_has_no_key() {
    assert!(keys().derive("", Directive::Default, &ctx()).is_none());
    assert!(keys().derive("/", Directive::Universal, &ctx()).is_none());
    assert!(keys().derive("", Directive::IpForever, &ctx()).is_none());
}

#[test]
fn presented_key_matching() {
    let key = keys().derive("a.zip", Directive::Default, &ctx()).unwrap();
    let presented = key.to_string();
    assert!(key.matches(&presented));
    assert!(!key.matches(&presented.to_uppercase()));
    assert!(!key.matches(""));
}
