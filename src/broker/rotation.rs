//! Guarded refresh and refresh-token rotation.
//!
//! Everything here runs while the caller holds the key's rotation guard. A rotated refresh token is
//! saved with the token it replaced as the optimistic expectation; a conflicting save gets exactly
//! one retry before the broker gives up on persisting and keeps the access token it obtained. A
//! failure during that retry never costs the caller the token already in hand.

// self
use crate::{
	_prelude::*,
	auth::{CacheKey, RefreshTokenPayload},
	broker::{MintContext, TokenBroker},
	exchange::TokenResponse,
	oauth::RefreshGrant,
	obs::{self, MintOutcome},
	store::SaveOutcome,
};

/// Upstream answer paired with the instant it was received.
struct Refreshed {
	grant: RefreshGrant,
	issued_at: OffsetDateTime,
}

impl TokenBroker {
	pub(super) async fn refresh_locked(
		&self,
		key: &CacheKey,
		ctx: &MintContext,
	) -> Result<TokenResponse> {
		// A waiter queued behind another refresh finds that refresh's token here.
		if let Some(response) = self.cached_response(key) {
			return Ok(response);
		}

		// Re-read under the guard; a predecessor may have rotated the token since the first load.
		let current =
			self.store.load(key).await?.ok_or_else(|| Error::NoRefreshToken { key: key.clone() })?;
		let mut refreshed = self.refresh_upstream(key, &current, ctx).await?;

		if refreshed.grant.rotates(current.refresh_token.expose()) {
			refreshed = self.persist_rotation(key, current, refreshed, ctx).await?;
		}

		let Refreshed { grant, issued_at } = refreshed;

		self.cache.put(key.clone(), grant.access_token.clone(), issued_at, grant.expires_in);
		obs::record_mint_outcome(MintOutcome::Refreshed);

		Ok(TokenResponse {
			access_token: grant.access_token,
			expires_in: grant.expires_in,
			issued_at,
			user_id: key.user.clone(),
			site_id: key.site.clone(),
		})
	}

	async fn refresh_upstream(
		&self,
		key: &CacheKey,
		payload: &RefreshTokenPayload,
		ctx: &MintContext,
	) -> Result<Refreshed> {
		let refresh_token = payload.refresh_token.expose();
		let grant = self
			.retry
			.run(key, ctx.cancellation(), || self.client.refresh(refresh_token))
			.await?;
		let issued_at = self.clock.now();

		self.metrics.record_refresh();

		tracing::debug!(%key, expires_in = grant.expires_in, "Refreshed access token upstream.");

		Ok(Refreshed { grant, issued_at })
	}

	async fn persist_rotation(
		&self,
		key: &CacheKey,
		current: RefreshTokenPayload,
		refreshed: Refreshed,
		ctx: &MintContext,
	) -> Result<Refreshed> {
		if self.save_rotation(key, &current, &refreshed).await? == SaveOutcome::Updated {
			return Ok(refreshed);
		}

		tracing::warn!(%key, "Refresh token save conflicted; retrying once.");

		let fresh = match self.store.load(key).await? {
			Some(fresh) if fresh.refresh_token == current.refresh_token => fresh,
			_ => {
				tracing::info!(
					%key,
					"Stored refresh token changed concurrently; keeping the obtained access token."
				);

				return Ok(refreshed);
			},
		};
		let retried = match self.refresh_upstream(key, &fresh, ctx).await {
			Ok(retried) => retried,
			Err(e) => {
				tracing::warn!(
					%key,
					error = %e,
					"Retried refresh failed; keeping the access token from the first refresh."
				);

				return Ok(refreshed);
			},
		};

		if retried.grant.rotates(fresh.refresh_token.expose())
			&& self.save_rotation(key, &fresh, &retried).await? == SaveOutcome::Conflict
		{
			let err = Error::RotationConflict { key: key.clone() };

			tracing::warn!(%key, error = %err, "Proceeding without persisting the rotated token.");
		}

		Ok(retried)
	}

	async fn save_rotation(
		&self,
		key: &CacheKey,
		current: &RefreshTokenPayload,
		refreshed: &Refreshed,
	) -> Result<SaveOutcome> {
		let replacement = current.rotated(&refreshed.grant, refreshed.issued_at);
		let next = replacement.refresh_token.fingerprint();
		let outcome = self.store.save(key, current.refresh_token.expose(), replacement).await?;

		match outcome {
			SaveOutcome::Updated => {
				self.metrics.record_rotation();

				tracing::info!(
					%key,
					from = %current.refresh_token.fingerprint(),
					to = %next,
					"Rotated refresh token."
				);
			},
			SaveOutcome::Conflict => self.metrics.record_conflict(),
		}

		Ok(outcome)
	}
}
