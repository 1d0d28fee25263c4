//! The process environment is global, so everything that touches it
//! lives in this one test, in a test binary of its own.

use std::env;
use std::net::Ipv4Addr;

use udp_netns_tunnel::HLError;
use udp_netns_tunnel::address::EndpointPair;
use udp_netns_tunnel::environment::{self, SavedEnvironment, BASE_VAR};
use udp_netns_tunnel::server::discover_base;

#[test]
fn environment_lifecycle() {
    env::set_var(BASE_VAR, "100.64.0.1");
    env::set_var("NETNS_TUNNEL_TEST_MARKER", "present");

    let saved = SavedEnvironment::capture().unwrap();
    assert!(saved.len() >= 2);
    assert!(env::vars_os().next().is_none());
    assert!(env::var_os("NETNS_TUNNEL_TEST_MARKER").is_none());
    saved.check_cleared("after capture").unwrap();

    // Scoped lookup sees the saved variables; nesting is refused.
    {
        let scope = saved.reinstate_for_lookup().unwrap();
        assert_eq!(scope.var("NETNS_TUNNEL_TEST_MARKER").as_deref(),
                   Some("present"));
        assert!(matches!(saved.reinstate_for_lookup(),
                         Err(HLError::EnvReentered)));
        assert!(matches!(saved.check_cleared("during lookup"),
                         Err(HLError::EnvNotCleared { .. })));
    }
    saved.check_cleared("after lookup").unwrap();

    // The enclosing tunnel's egress address moves us one subnet along.
    let base = discover_base(&saved).unwrap();
    assert_eq!(base.ip(), Ipv4Addr::new(100, 64, 0, 1));
    let pair = EndpointPair::derive(&base);
    assert_eq!(pair.egress.ip(), Ipv4Addr::new(100, 64, 0, 5));
    assert_eq!(pair.ingress.ip(), Ipv4Addr::new(100, 64, 0, 6));
    saved.check_cleared("after discover_base").unwrap();

    // Handing the environment back for good; an inherited base wins
    // over the default.
    saved.restore().unwrap();
    assert_eq!(env::var("NETNS_TUNNEL_TEST_MARKER").as_deref(),
               Ok("present"));
    environment::set_default_var(BASE_VAR, "100.64.0.9");
    assert_eq!(env::var(BASE_VAR).as_deref(), Ok("100.64.0.1"));

    // A garbled base is an error, not a silent fallback.
    env::set_var(BASE_VAR, "not-an-address");
    let saved = SavedEnvironment::capture().unwrap();
    assert!(matches!(discover_base(&saved),
                     Err(HLError::AddressError { .. })));
    saved.restore().unwrap();

    // So is one outside the tunnel pool, which could collide.
    env::set_var(BASE_VAR, "10.0.0.1");
    let saved = SavedEnvironment::capture().unwrap();
    assert!(matches!(discover_base(&saved),
                     Err(HLError::AddressError { .. })));
    saved.restore().unwrap();

    // With no base at all, the first subnet is used and the default
    // gets exported.
    env::remove_var(BASE_VAR);
    let saved = SavedEnvironment::capture().unwrap();
    let base = discover_base(&saved).unwrap();
    assert!(base.is_unspecified());
    saved.restore().unwrap();
    environment::set_default_var(BASE_VAR, "100.64.0.1");
    assert_eq!(env::var(BASE_VAR).as_deref(), Ok("100.64.0.1"));
}
