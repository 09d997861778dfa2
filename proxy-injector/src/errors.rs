use inject_common::errors::InjectError;
use kube::core::admission::AdmissionResponse;

#[derive(Debug)]
pub enum InjectPatchError {
    WithResponse(Box<AdmissionResponse>, InjectError),
    WithoutResponse(InjectError),
}

impl InjectPatchError {
    pub fn from_admission_response(
        response: Box<AdmissionResponse>,
    ) -> impl FnOnce(InjectError) -> Self {
        move |e: InjectError| InjectPatchError::WithResponse(Box::clone(&response), e)
    }
}

impl From<InjectError> for InjectPatchError {
    fn from(e: InjectError) -> Self {
        InjectPatchError::WithoutResponse(e)
    }
}
