use escrow_core::{
    AccountId, Amount, BlockHeight, CallContext, Escrow, EscrowConfig, EscrowError, EscrowState,
    InMemoryToken, Viewer,
};

const ALICE: &str = "alice";
const BOB: &str = "bob";

fn escrow() -> Escrow<InMemoryToken> {
    let mut token = InMemoryToken::new("token", vec![0]);
    token.mint(&ALICE.to_string(), 0, 690_000).unwrap();
    token.mint(&BOB.to_string(), 0, 10_000).unwrap();
    Escrow::new(EscrowState::new(EscrowConfig::default()), token).unwrap()
}

fn prior(
    escrow: &Escrow<InMemoryToken>,
    address: &str,
    level: BlockHeight,
    current: BlockHeight,
) -> Result<Amount, EscrowError> {
    let mut viewer = Viewer::new();
    escrow.get_prior_balance(
        &CallContext::new(BOB, current),
        &AccountId::from(address),
        level,
        &mut viewer,
    )?;
    let view = viewer.last().expect("view delivered");
    assert_eq!(view.address, address);
    assert_eq!(view.level, level);
    Ok(viewer.last_result().expect("view delivered"))
}

/// Deposits of 100 at levels 0, 2, 4 and 6, a release of 100 at 8 and a
/// deposit of 100 at 10: six checkpoints.
fn even_history() -> Escrow<InMemoryToken> {
    let mut escrow = escrow();
    for level in [0, 2, 4, 6] {
        escrow.escrow(&CallContext::new(ALICE, level), 100).unwrap();
    }
    escrow.release(&CallContext::new(ALICE, 8), 100).unwrap();
    escrow.escrow(&CallContext::new(ALICE, 10), 100).unwrap();
    escrow
}

#[test]
fn reverts_if_level_is_not_finalized() {
    let mut escrow = escrow();
    escrow.escrow(&CallContext::new(ALICE, 1), 100).unwrap();

    let err = prior(&escrow, ALICE, 3, 3).unwrap_err();
    assert_eq!(
        err,
        EscrowError::HeightNotFinalized {
            requested: 3,
            current: 3
        }
    );
    assert!(prior(&escrow, ALICE, 4, 3).is_err());
    assert_eq!(prior(&escrow, ALICE, 2, 3), Ok(100));
}

#[test]
fn returns_zero_without_checkpoints() {
    let escrow = escrow();
    for level in 0..5 {
        assert_eq!(prior(&escrow, ALICE, level, 5), Ok(0));
    }
}

#[test]
fn returns_zero_before_first_checkpoint() {
    let mut escrow = escrow();
    escrow.escrow(&CallContext::new(ALICE, 2), 100).unwrap();
    escrow.escrow(&CallContext::new(ALICE, 4), 100).unwrap();

    assert_eq!(prior(&escrow, ALICE, 1, 6), Ok(0));
    assert_eq!(prior(&escrow, ALICE, 2, 6), Ok(100));
    assert_eq!(prior(&escrow, ALICE, 3, 6), Ok(100));
}

#[test]
fn returns_last_balance_after_last_checkpoint() {
    let mut escrow = escrow();
    escrow.escrow(&CallContext::new(ALICE, 1), 100).unwrap();
    escrow.escrow(&CallContext::new(ALICE, 2), 50).unwrap();

    assert_eq!(prior(&escrow, ALICE, 2, 10), Ok(150));
    assert_eq!(prior(&escrow, ALICE, 9, 10), Ok(150));
}

#[test]
fn resolves_every_level_with_even_checkpoint_count() {
    let escrow = even_history();
    assert_eq!(
        escrow.state().checkpoints().num_checkpoints(&ALICE.to_string()),
        6
    );

    let expected = [100, 100, 200, 200, 300, 300, 400, 400, 300, 300, 400, 400];
    for (level, want) in expected.into_iter().enumerate() {
        assert_eq!(prior(&escrow, ALICE, level as u64, 12), Ok(want), "level {level}");
    }
}

#[test]
fn resolves_every_level_with_odd_checkpoint_count() {
    let mut escrow = even_history();
    escrow.release(&CallContext::new(ALICE, 12), 400).unwrap();
    assert_eq!(
        escrow.state().checkpoints().num_checkpoints(&ALICE.to_string()),
        7
    );

    assert_eq!(prior(&escrow, ALICE, 5, 14), Ok(300));
    assert_eq!(prior(&escrow, ALICE, 9, 14), Ok(300));
    assert_eq!(prior(&escrow, ALICE, 11, 14), Ok(400));
    assert_eq!(prior(&escrow, ALICE, 12, 14), Ok(0));
    assert_eq!(prior(&escrow, ALICE, 13, 14), Ok(0));

    let expected = [100, 100, 200, 200, 300, 300, 400, 400, 300, 300, 400, 400, 0, 0];
    for (level, want) in expected.into_iter().enumerate() {
        assert_eq!(prior(&escrow, ALICE, level as u64, 14), Ok(want), "level {level}");
    }
}

#[test]
fn latest_checkpoint_matches_current_balance() {
    let mut escrow = even_history();
    escrow.release(&CallContext::new(ALICE, 13), 250).unwrap();

    let current = escrow.get_balance(&ALICE.to_string());
    assert_eq!(current, 150);
    assert_eq!(prior(&escrow, ALICE, 13, 14), Ok(current));
    assert_eq!(prior(&escrow, ALICE, 500, 501), Ok(current));
}
